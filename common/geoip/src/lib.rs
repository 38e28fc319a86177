use std::net::IpAddr;
use std::path::Path;
use std::str::FromStr;

use maxminddb::{MaxMindDBError, Reader};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum GeoIpError {
    #[error("invalid IP address")]
    InvalidIp,
    #[error("Failed to open GeoIP database: {0}")]
    DatabaseOpen(#[source] MaxMindDBError),
    #[error("GeoIP lookup failed: {0}")]
    Lookup(#[source] MaxMindDBError),
}

/// Latitude and longitude of a resolved address.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

/// Resolves a client IP string to coordinates.
///
/// Implementations must return `GeoIpError::InvalidIp` when the input is not
/// an IP address, so callers can tell bad input apart from lookup failures.
pub trait GeoLocator: Send + Sync {
    fn lookup(&self, ip: &str) -> Result<Coordinates, GeoIpError>;
}

#[derive(Deserialize, Default)]
struct CityRecord {
    location: Option<Location>,
}

#[derive(Deserialize, Default)]
struct Location {
    latitude: Option<f64>,
    longitude: Option<f64>,
}

impl CityRecord {
    fn coordinates(&self) -> Coordinates {
        match &self.location {
            Some(Location {
                latitude: Some(lat),
                longitude: Some(lng),
            }) => Coordinates {
                lat: *lat,
                lng: *lng,
            },
            _ => Coordinates::default(),
        }
    }
}

/// Parses the given string as an IPv4 or IPv6 address.
pub fn parse_ip(ip: &str) -> Result<IpAddr, GeoIpError> {
    IpAddr::from_str(ip.trim()).map_err(|_| GeoIpError::InvalidIp)
}

pub struct MaxMindLocator {
    reader: Reader<Vec<u8>>,
}

impl MaxMindLocator {
    /// Opens the MaxMind city database at `db_path`.
    /// Returns an error if the database can't be loaded.
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self, GeoIpError> {
        let db_path = db_path.as_ref();
        debug!("Attempting to open GeoIP database at: {:?}", db_path);

        let reader = Reader::open_readfile(db_path).map_err(GeoIpError::DatabaseOpen)?;
        info!("Successfully opened GeoIP database");

        Ok(MaxMindLocator { reader })
    }
}

impl GeoLocator for MaxMindLocator {
    fn lookup(&self, ip: &str) -> Result<Coordinates, GeoIpError> {
        let addr = parse_ip(ip)?;

        match self.reader.lookup::<CityRecord>(addr) {
            Ok(city) => Ok(city.coordinates()),
            // Private and unallocated ranges are simply not in the database
            Err(MaxMindDBError::AddressNotFoundError(_)) => Ok(Coordinates::default()),
            Err(e) => Err(GeoIpError::Lookup(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_locator_creation_failure() {
        let result = MaxMindLocator::new("/non/existent/path.mmdb");
        assert!(matches!(result, Err(GeoIpError::DatabaseOpen(_))));
    }

    #[test]
    fn test_parse_ip() {
        assert!(parse_ip("13.106.122.3").is_ok());
        assert!(parse_ip("2600:6c52:7a00:11c:1b6:b7b0:ea19:6365").is_ok());
        assert!(parse_ip(" 31.28.64.3 ").is_ok());

        assert!(matches!(parse_ip("not_an_ip"), Err(GeoIpError::InvalidIp)));
        assert!(matches!(
            parse_ip("999.999.999.999"),
            Err(GeoIpError::InvalidIp)
        ));
        assert!(matches!(parse_ip(""), Err(GeoIpError::InvalidIp)));
    }

    #[test]
    fn test_invalid_ip_message() {
        assert_eq!(GeoIpError::InvalidIp.to_string(), "invalid IP address");
    }

    #[test]
    fn test_coordinates_from_city_record() {
        let city: CityRecord = serde_json::from_value(json!({
            "city": {"names": {"en": "New York"}},
            "location": {
                "latitude": 40.7128,
                "longitude": -74.006,
                "time_zone": "America/New_York"
            }
        }))
        .unwrap();

        assert_eq!(
            city.coordinates(),
            Coordinates {
                lat: 40.7128,
                lng: -74.006
            }
        );
    }

    #[test]
    fn test_coordinates_without_location() {
        let city: CityRecord = serde_json::from_value(json!({
            "country": {"iso_code": "US"}
        }))
        .unwrap();
        assert_eq!(city.coordinates(), Coordinates::default());

        let partial: CityRecord = serde_json::from_value(json!({
            "location": {"latitude": 51.5}
        }))
        .unwrap();
        assert_eq!(partial.coordinates(), Coordinates::default());
    }
}

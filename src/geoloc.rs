//! Geolocation engine mapping client addresses to datacenters.
//!
//! Resolution is CIDR-first: a datacenter owning the client's network wins
//! outright. Only then is the MaxMind database consulted and the closest
//! candidate picked by equirectangular great-circle distance.

use dashmap::DashMap;
use std::net::IpAddr;
use std::path::Path;

use crate::config::{DcPosition, Position};
use crate::error::GslbError;
use crate::metrics;

/// Mean earth radius, meters.
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Source of geographic positions for client addresses.
///
/// The production implementation reads a MaxMind City database; tests
/// substitute fixtures.
pub trait GeoDb: Send + Sync {
    /// Position of the address, `None` when the database has no record.
    fn position(&self, ip: IpAddr) -> Option<Position>;
}

/// MaxMind City database backed [`GeoDb`].
pub struct MaxmindGeoDb {
    reader: maxminddb::Reader<Vec<u8>>,
}

impl MaxmindGeoDb {
    /// Open the database file; failure here is fatal at startup.
    pub fn open(path: &Path) -> Result<Self, GslbError> {
        let reader = maxminddb::Reader::open_readfile(path)
            .map_err(|e| GslbError::Config(format!("geo db {}: {e}", path.display())))?;
        Ok(Self { reader })
    }
}

impl GeoDb for MaxmindGeoDb {
    fn position(&self, ip: IpAddr) -> Option<Position> {
        let city: maxminddb::geoip2::City = self.reader.lookup(ip).ok()?;
        let location = city.location?;
        Some(Position {
            longitude: location.longitude?,
            latitude: location.latitude?,
        })
    }
}

/// Maps a client IP to the datacenter to serve from.
pub struct GeoLoc {
    dc_positions: Vec<DcPosition>,
    geo_db: Option<Box<dyn GeoDb>>,
    cache: DashMap<IpAddr, String>,
}

impl GeoLoc {
    /// Build the engine over the configured datacenter positions. Without a
    /// database only CIDR matches can succeed.
    pub fn new(dc_positions: Vec<DcPosition>, geo_db: Option<Box<dyn GeoDb>>) -> Self {
        Self {
            dc_positions,
            geo_db,
            cache: DashMap::new(),
        }
    }

    /// Name of the datacenter to serve `ip` from, restricted to
    /// `candidates`.
    ///
    /// Cached results are returned as-is; entries are stable for the
    /// process lifetime.
    pub fn find_dc(&self, ip: IpAddr, candidates: &[String]) -> Result<String, GslbError> {
        if let Some(dc) = self.cache.get(&ip) {
            return Ok(dc.clone());
        }
        if candidates.is_empty() {
            return Err(GslbError::NoDc(ip));
        }
        for dc_pos in &self.dc_positions {
            if !candidates.contains(&dc_pos.dc_name) {
                continue;
            }
            if dc_pos.cidrs.iter().any(|cidr| cidr.contains(&ip)) {
                return Ok(self.cache_dc(ip, dc_pos.dc_name.clone()));
            }
        }

        let position = self
            .geo_db
            .as_ref()
            .and_then(|db| db.position(ip))
            .ok_or(GslbError::GeoLookup(ip))?;

        let dc = self
            .find_nearest(&position, candidates)
            .ok_or(GslbError::NoDc(ip))?;
        Ok(self.cache_dc(ip, dc))
    }

    fn cache_dc(&self, ip: IpAddr, dc: String) -> String {
        self.cache.insert(ip, dc.clone());
        metrics::record_geo_cache_size(self.cache.len());
        dc
    }

    fn find_nearest(&self, position: &Position, candidates: &[String]) -> Option<String> {
        let mut min_distance = f64::MAX;
        let mut nearest: Option<&str> = None;
        for dc_pos in &self.dc_positions {
            if !candidates.contains(&dc_pos.dc_name) {
                continue;
            }
            let distance = distance_meters(position, &dc_pos.position);
            if distance < min_distance {
                min_distance = distance;
                nearest = Some(&dc_pos.dc_name);
            }
        }
        nearest.map(String::from)
    }

    /// Cached associations, for introspection.
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }
}

/// Equirectangular approximation of the great-circle distance.
fn distance_meters(a: &Position, b: &Position) -> f64 {
    let x = deg2rad(a.longitude - b.longitude) * deg2rad((a.latitude + b.latitude) / 2.0).cos();
    let y = deg2rad(a.latitude - b.latitude);
    EARTH_RADIUS_M * (x * x + y * y).sqrt()
}

fn deg2rad(degrees: f64) -> f64 {
    degrees * (std::f64::consts::PI / 180.0)
}

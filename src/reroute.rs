//! Rerouting advice for full spots.
//!
//! A full spot is pointed at the nearest alternative that has free space and is not more
//! expensive. Distances are great-circle distances in kilometres.

use crate::features::SpotId;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// State of one spot at a given moment, as seen by its competitors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpotSnapshot {
    pub spot_id: SpotId,
    pub latitude: f64,
    pub longitude: f64,
    pub price: f64,
    pub occupancy: u32,
    pub capacity: u32,
}

impl SpotSnapshot {
    pub fn has_free_space(&self) -> bool {
        self.occupancy < self.capacity
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompetitorSnapshot {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub spots: Vec<SpotSnapshot>,
}

impl CompetitorSnapshot {
    pub fn spot(&self, spot_id: SpotId) -> Option<&SpotSnapshot> {
        self.spots.iter().find(|s| s.spot_id == spot_id)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RerouteConfig {
    /// Candidates farther than this are ignored. `None` searches every spot.
    pub radius_km: Option<f64>,
}

pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (lat1, lon1, lat2, lon2) = (
        lat1.to_radians(),
        lon1.to_radians(),
        lat2.to_radians(),
        lon2.to_radians(),
    );
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().min(1.0).asin()
}

pub fn distance_km(a: &SpotSnapshot, b: &SpotSnapshot) -> f64 {
    haversine_km(a.latitude, a.longitude, b.latitude, b.longitude)
}

/// Recommend an alternative for `origin`, or `None` when it still has space or nothing
/// qualifies. Ties on distance go to the cheaper spot, then the lower id.
pub fn recommend(
    origin: &SpotSnapshot,
    candidates: &[SpotSnapshot],
    config: &RerouteConfig,
) -> Option<SpotId> {
    if origin.has_free_space() {
        return None;
    }

    candidates
        .iter()
        .filter(|c| c.spot_id != origin.spot_id)
        .filter(|c| c.has_free_space() && c.price <= origin.price)
        .map(|c| (distance_km(origin, c), c))
        .filter(|(d, _)| config.radius_km.is_none_or(|radius| *d <= radius))
        .min_by(|(da, a), (db, b)| {
            da.total_cmp(db)
                .then_with(|| a.price.total_cmp(&b.price))
                .then_with(|| a.spot_id.cmp(&b.spot_id))
        })
        .map(|(_, c)| c.spot_id)
}

/// Spots within `radius_km` of `origin`, excluding the origin itself.
pub fn neighbours<'a>(
    origin_id: SpotId,
    latitude: f64,
    longitude: f64,
    spots: &'a [SpotSnapshot],
    radius_km: Option<f64>,
) -> impl Iterator<Item = &'a SpotSnapshot> {
    spots.iter().filter(move |s| {
        s.spot_id != origin_id
            && radius_km.is_none_or(|radius| {
                haversine_km(latitude, longitude, s.latitude, s.longitude) <= radius
            })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spot(spot_id: SpotId, latitude: f64, longitude: f64, price: f64, occupancy: u32) -> SpotSnapshot {
        SpotSnapshot {
            spot_id,
            latitude,
            longitude,
            price,
            occupancy,
            capacity: 100,
        }
    }

    #[test]
    fn haversine_is_symmetric_and_zero_on_identity() {
        let (a_lat, a_lon) = (26.14453614, 91.73617216);
        let (b_lat, b_lon) = (26.15050395, 91.73353109);

        let ab = haversine_km(a_lat, a_lon, b_lat, b_lon);
        let ba = haversine_km(b_lat, b_lon, a_lat, a_lon);

        assert_eq!(ab, ba);
        assert_eq!(haversine_km(a_lat, a_lon, a_lat, a_lon), 0.0);
        assert!(ab > 0.6 && ab < 0.8, "unexpected distance {ab}");
    }

    #[test]
    fn one_degree_of_latitude_is_about_111_km() {
        let d = haversine_km(0.0, 0.0, 1.0, 0.0);

        assert!((d - 111.195).abs() < 0.01);
    }

    #[test]
    fn origin_with_free_space_gets_no_recommendation() {
        let origin = spot(1, 26.144, 91.736, 15.0, 99);
        let candidates = vec![spot(2, 26.145, 91.736, 10.0, 10)];

        assert_eq!(recommend(&origin, &candidates, &RerouteConfig::default()), None);
    }

    #[test]
    fn prefers_farther_cheaper_available_spot_over_nearer_pricier_one() {
        let origin = spot(1, 26.1400, 91.7300, 15.0, 100);
        let nearer_pricier = spot(2, 26.1405, 91.7300, 18.0, 10);
        let farther_cheaper = spot(3, 26.1500, 91.7300, 12.0, 10);

        let choice = recommend(
            &origin,
            &[nearer_pricier, farther_cheaper],
            &RerouteConfig::default(),
        );

        assert_eq!(choice, Some(3));
    }

    #[test]
    fn full_candidates_are_skipped() {
        let origin = spot(1, 26.1400, 91.7300, 15.0, 100);
        let nearer_full = spot(2, 26.1401, 91.7300, 10.0, 100);
        let farther_open = spot(3, 26.1450, 91.7300, 14.0, 20);

        let choice = recommend(&origin, &[nearer_full, farther_open], &RerouteConfig::default());

        assert_eq!(choice, Some(3));
    }

    #[test]
    fn equal_price_candidate_qualifies() {
        let origin = spot(1, 26.1400, 91.7300, 15.0, 100);

        let choice = recommend(
            &origin,
            &[spot(2, 26.1410, 91.7300, 15.0, 0)],
            &RerouteConfig::default(),
        );

        assert_eq!(choice, Some(2));
    }

    #[test]
    fn distance_ties_break_on_price_then_id() {
        let origin = spot(1, 26.1400, 91.7300, 15.0, 100);
        let same_place = (26.1450, 91.7300);
        let candidates = vec![
            spot(9, same_place.0, same_place.1, 12.0, 0),
            spot(4, same_place.0, same_place.1, 11.0, 0),
            spot(3, same_place.0, same_place.1, 11.0, 0),
        ];

        let choice = recommend(&origin, &candidates, &RerouteConfig::default());

        assert_eq!(choice, Some(3));
    }

    #[test]
    fn radius_limits_candidates() {
        let origin = spot(1, 26.14, 91.73, 15.0, 100);
        let far_away = spot(2, 20.0000347, 78.00000286, 5.0, 0);
        let config = RerouteConfig {
            radius_km: Some(2.0),
        };

        assert_eq!(recommend(&origin, &[far_away.clone()], &config), None);
        assert_eq!(
            recommend(&origin, &[far_away], &RerouteConfig::default()),
            Some(2)
        );
    }

    #[test]
    fn origin_is_never_recommended_to_itself() {
        let origin = spot(1, 26.14, 91.73, 15.0, 100);
        let mut copy = origin.clone();
        copy.occupancy = 0;

        assert_eq!(recommend(&origin, &[copy], &RerouteConfig::default()), None);
    }

    #[test]
    fn neighbours_exclude_origin_and_far_spots() {
        let spots = vec![
            spot(1, 26.14, 91.73, 10.0, 0),
            spot(2, 26.141, 91.73, 10.0, 0),
            spot(3, 20.0, 78.0, 10.0, 0),
        ];

        let ids: Vec<SpotId> = neighbours(1, 26.14, 91.73, &spots, Some(2.0))
            .map(|s| s.spot_id)
            .collect();

        assert_eq!(ids, vec![2]);
    }
}

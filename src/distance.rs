//! Haversine distance and decay-weight kernels.

pub const EARTH_RADIUS_KM: f64 = 6371.0088;

pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecayMode {
    #[default]
    Exponential,
    Rational,
}

/// `w = exp(-d/d0)`. Returns 0 when `d0_km <= 0`.
pub fn weight_exp(d_km: f64, d0_km: f64) -> f64 {
    if d0_km <= 0.0 {
        return 0.0;
    }
    (-d_km / d0_km).exp()
}

/// `w = 1 / (1 + d/d0)^gamma`. Returns 0 when `d0_km <= 0`; `gamma <= 0` is
/// treated as `gamma = 1`.
pub fn weight_rational(d_km: f64, d0_km: f64, gamma: f64) -> f64 {
    if d0_km <= 0.0 {
        return 0.0;
    }
    let gamma = if gamma <= 0.0 { 1.0 } else { gamma };
    1.0 / (1.0 + d_km / d0_km).powf(gamma)
}

pub fn weight(mode: DecayMode, d_km: f64, d0_km: f64, gamma: f64) -> f64 {
    match mode {
        DecayMode::Exponential => weight_exp(d_km, d0_km),
        DecayMode::Rational => weight_rational(d_km, d0_km, gamma),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn haversine_zero_distance_for_identical_points() {
        assert!(haversine_km(55.6, 13.3, 55.6, 13.3).abs() < 1e-9);
    }

    #[test]
    fn haversine_known_distance_stockholm_malmo() {
        // Stockholm to Malmo is roughly 520km by great circle.
        let d = haversine_km(59.3293, 18.0686, 55.6050, 13.0038);
        assert!((500.0..540.0).contains(&d), "got {d}");
    }

    #[test]
    fn exp_weight_zero_d0_is_zero() {
        assert_eq!(weight_exp(10.0, 0.0), 0.0);
        assert_eq!(weight_exp(10.0, -5.0), 0.0);
    }

    #[test]
    fn rational_weight_matches_scenario_5() {
        // 30km away at d0=30, gamma=2 -> w = 1/(1+1)^2 = 0.25
        let w = weight_rational(30.0, 30.0, 2.0);
        assert!((w - 0.25).abs() < 1e-9);
    }

    #[test]
    fn rational_weight_nonpositive_gamma_defaults_to_one() {
        let a = weight_rational(10.0, 20.0, 0.0);
        let b = weight_rational(10.0, 20.0, 1.0);
        assert!((a - b).abs() < 1e-12);
    }
}

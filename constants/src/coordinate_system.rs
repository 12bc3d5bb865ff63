/// Axis change from local ENU (z up) into glTF content space (y up).
/// Row-major: [x_new, y_new, z_new]. X = east, Y = up, Z = -north.
pub const ENU_TO_GLTF: [[f64; 3]; 3] = [
    [1.0, 0.0, 0.0],  // X = E
    [0.0, 0.0, 1.0],  // Y = U
    [0.0, -1.0, 0.0], // Z = -N
];

/// Apply the ENU to glTF axis change to a single position.
pub fn enu_to_gltf(x: f64, y: f64, z: f64) -> (f64, f64, f64) {
    let input = [x, y, z];
    let mut output = [0.0; 3];

    for i in 0..3 {
        for j in 0..3 {
            output[i] += ENU_TO_GLTF[i][j] * input[j];
        }
    }

    (output[0], output[1], output[2])
}

/// Sphere radius used by the web-Mercator plane (meters).
pub const MERCATOR_EARTH_RADIUS: f64 = 6_371_008.8;

/// Latitude limit of the square web-Mercator plane (degrees).
pub const MAX_MERCATOR_LATITUDE: f64 = 85.051_128_779_806_6;

/// WGS84 semi-major axis (meters).
pub const WGS84_A: f64 = 6_378_137.0;

/// WGS84 flattening.
pub const WGS84_F: f64 = 1.0 / 298.257_223_563;

/// WGS84 first eccentricity squared.
pub const WGS84_E2: f64 = WGS84_F * (2.0 - WGS84_F);

/// Largest longitude offset from the central meridian the transverse
/// Mercator series is trusted for (degrees).
pub const MAX_TMERC_LONGITUDE_OFFSET: f64 = 60.0;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enu_up_becomes_gltf_y() {
        assert_eq!(enu_to_gltf(1.0, 2.0, 3.0), (1.0, 3.0, -2.0));
    }
}

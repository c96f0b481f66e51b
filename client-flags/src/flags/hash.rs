const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;
const BUCKET_SCALE: f64 = 4_294_967_296.0; // 2^32

/// 32-bit FNV-1a over raw bytes.
pub fn fnv1a_32(input: &[u8]) -> u32 {
    input.iter().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u32::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}

/// Maps a seed to a stable position in `[0, 1)`.
///
/// Given the same seed this returns the same float on every platform and in every process, which
/// is what keeps a user inside (or outside) a rollout across restarts. The values are spread
/// evenly over the unit interval, so `bucket(seed) < 0.2` holds for roughly 20% of seeds.
pub fn bucket(seed: &str) -> f64 {
    f64::from(fnv1a_32(seed.as_bytes())) / BUCKET_SCALE
}

/// Seeds are namespaced per flag so a user's buckets are independent across flags.
pub fn rollout_seed(flag_name: &str, stable_id: &str) -> String {
    format!("{flag_name}:{stable_id}")
}

use rand::Rng;

const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Generate a random alphanumeric short key of the given length.
///
/// Each character is drawn independently and uniformly from the 62-character
/// alphabet. Nothing here guarantees uniqueness; callers insert with
/// insert-if-absent and regenerate on conflict.
pub fn generate(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

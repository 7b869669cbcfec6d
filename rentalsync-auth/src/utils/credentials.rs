//! One-time credentials handed to newly provisioned tenants.

use rand::seq::SliceRandom;
use rand::Rng;

pub const DEFAULT_INVITATION_CODE_LENGTH: usize = 6;
pub const DEFAULT_TEMPORARY_PASSWORD_LENGTH: usize = 8;

const INVITATION_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

const LOWERCASE: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const UPPERCASE: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGITS: &[u8] = b"0123456789";
pub const SPECIAL_CHARACTERS: &[u8] = b"!@#$%^&*";

/// Independent uniform draws from `[A-Z0-9]`. Not unique; the registry
/// lookup is keyed by email as well.
pub fn generate_invitation_code(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| INVITATION_ALPHABET[rng.gen_range(0..INVITATION_ALPHABET.len())] as char)
        .collect()
}

/// Password with at least one lowercase, uppercase, digit and special
/// character, shuffled. Lengths below 4 are raised to 4.
pub fn generate_temporary_password(length: usize) -> String {
    let mut rng = rand::thread_rng();
    let classes = [LOWERCASE, UPPERCASE, DIGITS, SPECIAL_CHARACTERS];
    let all: Vec<u8> = classes.concat();

    let mut chars: Vec<u8> = classes
        .iter()
        .map(|class| class[rng.gen_range(0..class.len())])
        .collect();

    while chars.len() < length {
        chars.push(all[rng.gen_range(0..all.len())]);
    }

    chars.shuffle(&mut rng);
    chars.into_iter().map(char::from).collect()
}

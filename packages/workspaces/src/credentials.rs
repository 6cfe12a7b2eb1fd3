// ABOUTME: Per-session workspace entry password generation
// ABOUTME: Passwords are handed to the caller and the workspace environment, never stored here

use crate::types::AccessCredential;

const PASSWORD_LENGTH: usize = 24;

const ALPHABET: [char; 36] = [
    'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm', 'n', 'o', 'p', 'q', 'r', 's',
    't', 'u', 'v', 'w', 'x', 'y', 'z', '0', '1', '2', '3', '4', '5', '6', '7', '8', '9',
];

/// Generate a random 24 character lowercase alphanumeric password
pub fn generate_password() -> AccessCredential {
    AccessCredential::new(nanoid::nanoid!(PASSWORD_LENGTH, &ALPHABET))
}

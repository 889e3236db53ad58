use std::fmt::Display;
use std::time::Instant;

use console::Style;

const ANSI_BLUE: Style = Style::new().blue();

/// A 32-byte BLAKE3 hash used for content addressing.
///
/// Fingerprinted file names are derived from a prefix of the hex form, so two
/// runs over the same bytes always produce the same name.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub(crate) struct Hash32([u8; 32]);

impl<T> From<T> for Hash32
where
    T: Into<[u8; 32]>,
{
    fn from(value: T) -> Self {
        Hash32(value.into())
    }
}

impl Hash32 {
    pub(crate) fn hash(buffer: impl AsRef<[u8]>) -> Self {
        blake3::Hasher::new()
            .update(buffer.as_ref())
            .finalize()
            .into()
    }

    pub(crate) fn hash_file(path: impl AsRef<std::path::Path>) -> std::io::Result<Self> {
        Ok(blake3::Hasher::new()
            .update_mmap_rayon(path)?
            .finalize()
            .into())
    }

    pub(crate) fn to_hex(self) -> String {
        const HEX: &[u8; 16] = b"0123456789abcdef";
        let mut acc = String::with_capacity(64);

        for &byte in &self.0 {
            acc.push(HEX[(byte >> 4) as usize] as char);
            acc.push(HEX[(byte & 0xF) as usize] as char);
        }

        acc
    }

    /// Short form used in file names.
    pub(crate) fn to_short(self) -> String {
        let mut hex = self.to_hex();
        hex.truncate(10);
        hex
    }
}

impl std::fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hash32({})", self.to_hex())
    }
}

/// The mode the pipeline runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Build everything once, watch for changes, rebuild and reload.
    Dev,
    /// Build everything once with minification and fingerprinting, then exit.
    Prod,
}

impl Mode {
    pub fn is_production(self) -> bool {
        matches!(self, Mode::Prod)
    }
}

impl Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Dev => f.write_str("dev"),
            Mode::Prod => f.write_str("prod"),
        }
    }
}

pub(crate) fn as_overhead(s: Instant) -> impl Display {
    let f = format!("(+{}ms)", s.elapsed().as_millis());
    ANSI_BLUE.apply_to(f)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_stable() {
        let a = Hash32::hash(b"body { color: red }");
        let b = Hash32::hash(b"body { color: red }");
        assert_eq!(a, b);
        assert_ne!(a, Hash32::hash(b"body { color: blue }"));
    }

    #[test]
    fn test_short_hex() {
        let hash = Hash32::hash(b"");
        // blake3("") = af1349b9f5f9a1a6...
        assert_eq!(hash.to_short(), "af1349b9f5");
        assert_eq!(hash.to_hex().len(), 64);
    }
}

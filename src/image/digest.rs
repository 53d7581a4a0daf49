use crate::errors::ImageError;
use regex::Regex;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::{
    cmp::{Ord, Ordering, PartialOrd},
    fmt,
    fs::File,
    hash::{Hash, Hasher},
    io,
    io::{Read, Write},
    path::Path,
    str,
    str::FromStr,
};

/// The only digest algorithm this client produces or accepts
pub const ALGORITHM: &str = "sha256";

/// A digest securely identifies the specific contents of a binary object
///
/// Digests are always `sha256:` followed by 64 lowercase hexadecimal digits.
/// Two blobs with equal digests are treated as the same content, which is
/// what lets the registry skip uploads it already has.
#[derive(Clone)]
pub struct ContentDigest {
    serialized: String,
}

impl Eq for ContentDigest {}

impl PartialEq for ContentDigest {
    fn eq(&self, other: &Self) -> bool {
        self.serialized.eq(&other.serialized)
    }
}

impl FromStr for ContentDigest {
    type Err = ImageError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ContentDigest::parse(s)
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl Hash for ContentDigest {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.serialized.hash(state);
    }
}

impl Ord for ContentDigest {
    fn cmp(&self, other: &Self) -> Ordering {
        self.serialized.cmp(&other.serialized)
    }
}

impl PartialOrd for ContentDigest {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Serialize for ContentDigest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ContentDigest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ContentDigest::parse(&s).map_err(de::Error::custom)
    }
}

impl ContentDigest {
    /// Returns a reference to the existing string representation of a
    /// [ContentDigest], for example `sha256:2c26b46b...`
    pub fn as_str(&self) -> &str {
        &self.serialized
    }

    /// Create a new ContentDigest from a hash value
    pub fn from_hash<T: fmt::LowerHex>(hash: &T) -> Self {
        ContentDigest {
            serialized: format!("{}:{:x}", ALGORITHM, hash),
        }
    }

    /// Create a ContentDigest from the bare hexadecimal part
    pub fn from_hex(hex: &str) -> Result<Self, ImageError> {
        ContentDigest::parse(&format!("{}:{}", ALGORITHM, hex))
    }

    /// Create a new ContentDigest from content data
    ///
    /// ```
    /// # use dockyard::image::ContentDigest;
    /// let digest = ContentDigest::from_content(b"cat");
    /// assert_eq!(digest.as_str(), "sha256:77af778b51abd4a3c51c5ddd97204a9c3ae614ebccb75a606c3b6865aed6744e");
    /// ```
    pub fn from_content(content_bytes: &[u8]) -> Self {
        ContentDigest::from_hash(&Sha256::digest(content_bytes))
    }

    /// Hash everything a reader produces, returning the digest and byte count
    pub fn from_reader<R: Read>(reader: &mut R) -> Result<(Self, u64), ImageError> {
        let mut writer = DigestWriter::new(io::sink());
        let size = io::copy(reader, &mut writer)?;
        let (_, digest) = writer.finalize();
        Ok((digest, size))
    }

    /// Stream-hash the contents of a file on disk
    pub fn from_file(path: &Path) -> Result<(Self, u64), ImageError> {
        let mut file = File::open(path)?;
        ContentDigest::from_reader(&mut file)
    }

    /// Parse a [prim@str] as a [ContentDigest]
    ///
    /// ```
    /// # use dockyard::image::ContentDigest;
    /// let s = "sha256:00112233445566778899aabbccddeeff00112233445566778899aabbccddeeff";
    /// let digest = ContentDigest::parse(s).unwrap();
    /// assert_eq!(digest.hex_str(), &s[7..]);
    /// ```
    pub fn parse(s: &str) -> Result<Self, ImageError> {
        lazy_static! {
            static ref RE: Regex =
                Regex::new(&format!("^{}$", ContentDigest::regex_str(),)).unwrap();
        }
        match RE.is_match(s) {
            false => Err(ImageError::InvalidReferenceFormat(s.to_owned())),
            true => Ok(ContentDigest {
                serialized: s.to_owned(),
            }),
        }
    }

    /// Return a reference to the algorithm portion of this digest, always
    /// `sha256`
    pub fn format_str(&self) -> &str {
        ALGORITHM
    }

    /// Return a reference to the 64 hex digits after the colon
    pub fn hex_str(&self) -> &str {
        &self.serialized[ALGORITHM.len() + 1..]
    }

    pub(crate) fn regex_str() -> &'static str {
        concat!(
            "(?P<dig>", // digest group
            /*  */ "sha256", // the only supported format
            /*  */ "[:]", // Main separator
            /*  */ "(?P<dig_h>", // digest hex group
            /* -- */ "[a-f0-9]{64}",
            /*  */ ")",
            ")",
        )
    }
}

/// Writer adapter that hashes everything written through it
///
/// Wraps any [Write] and computes the sha256 [ContentDigest] of the bytes
/// that were actually accepted by the inner writer.
pub struct DigestWriter<W: Write> {
    inner: W,
    hasher: Sha256,
    written: u64,
}

impl<W: Write> DigestWriter<W> {
    pub fn new(inner: W) -> Self {
        DigestWriter {
            inner,
            hasher: Sha256::new(),
            written: 0,
        }
    }

    /// Number of bytes hashed so far
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Detach the inner writer and return the final content digest
    pub fn finalize(self) -> (W, ContentDigest) {
        let digest = ContentDigest::from_hash(&self.hasher.finalize());
        (self.inner, digest)
    }
}

impl<W: Write> Write for DigestWriter<W> {
    fn write(&mut self, buf: &[u8]) -> Result<usize, io::Error> {
        let actual_size = self.inner.write(buf)?;
        self.hasher.update(&buf[..actual_size]);
        self.written += actual_size as u64;
        Ok(actual_size)
    }

    fn flush(&mut self) -> Result<(), io::Error> {
        self.inner.flush()
    }
}

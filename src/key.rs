//! Candidate keys backed by sequoia-openpgp, and rewriting a found key's
//! creation time.

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, UNIX_EPOCH};

use log::debug;
use sequoia_openpgp::{
    cert::{CertBuilder, CipherSuite},
    packet::{key, signature::SignatureBuilder, Key, Packet, Signature},
    parse::Parse,
    serialize::{Marshal, MarshalInto},
    types::{Features, KeyFlags, SignatureType},
    Cert,
};

use crate::engine::{Candidate, Target};
use crate::error::{Error, Result};
use crate::preimage::KEY_VERSION;

/// User ID used when none is given.
pub const DEFAULT_USER_ID: &str = "Dummy <dummy@example.com>";

/// Public-key algorithm family of generated keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Suite {
    #[default]
    Cv25519,
    P256,
    P384,
    P521,
    Rsa2k,
    Rsa3k,
    Rsa4k,
}

impl From<Suite> for CipherSuite {
    fn from(suite: Suite) -> Self {
        match suite {
            Suite::Cv25519 => CipherSuite::Cv25519,
            Suite::P256 => CipherSuite::P256,
            Suite::P384 => CipherSuite::P384,
            Suite::P521 => CipherSuite::P521,
            Suite::Rsa2k => CipherSuite::RSA2k,
            Suite::Rsa3k => CipherSuite::RSA3k,
            Suite::Rsa4k => CipherSuite::RSA4k,
        }
    }
}

impl FromStr for Suite {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cv25519" | "curve25519" | "ed25519" => Ok(Suite::Cv25519),
            "p256" | "nistp256" => Ok(Suite::P256),
            "p384" | "nistp384" => Ok(Suite::P384),
            "p521" | "nistp521" => Ok(Suite::P521),
            "rsa2k" | "rsa2048" | "2048" => Ok(Suite::Rsa2k),
            "rsa3k" | "rsa3072" | "3072" => Ok(Suite::Rsa3k),
            "rsa4k" | "rsa4096" | "4096" => Ok(Suite::Rsa4k),
            _ => Err(format!("Unknown cipher suite: {}", s)),
        }
    }
}

impl fmt::Display for Suite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Suite::Cv25519 => "cv25519",
            Suite::P256 => "p256",
            Suite::P384 => "p384",
            Suite::P521 => "p521",
            Suite::Rsa2k => "rsa2k",
            Suite::Rsa3k => "rsa3k",
            Suite::Rsa4k => "rsa4k",
        };
        f.write_str(name)
    }
}

/// What every candidate key looks like.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyOptions {
    pub suite: Suite,
    pub user_ids: Vec<String>,
}

impl KeyOptions {
    pub fn new(suite: Suite, user_ids: Vec<String>) -> Self {
        let user_ids = if user_ids.is_empty() {
            vec![DEFAULT_USER_ID.to_string()]
        } else {
            user_ids
        };
        Self { suite, user_ids }
    }

    /// Generates a certify+sign primary key with one encryption subkey.
    pub fn generate(&self) -> Result<CandidateKey> {
        let mut builder = CertBuilder::new()
            .set_cipher_suite(self.suite.into())
            .set_primary_key_flags(KeyFlags::empty().set_certification().set_signing())
            .add_subkey(
                KeyFlags::empty()
                    .set_transport_encryption()
                    .set_storage_encryption(),
                None,
                CipherSuite::from(self.suite),
            );
        for uid in &self.user_ids {
            builder = builder.add_userid(uid.as_str());
        }
        let (cert, _revocation) = builder.generate().map_err(Error::KeyGeneration)?;
        Ok(CandidateKey { cert })
    }
}

impl Default for KeyOptions {
    fn default() -> Self {
        Self::new(Suite::default(), Vec::new())
    }
}

/// A generated key owned by one search attempt.
#[derive(Debug, Clone)]
pub struct CandidateKey {
    cert: Cert,
}

impl CandidateKey {
    pub fn from_cert(cert: Cert) -> Self {
        Self { cert }
    }

    pub fn cert(&self) -> &Cert {
        &self.cert
    }

    pub fn fingerprint(&self) -> String {
        self.cert.fingerprint().to_hex()
    }
}

impl Candidate for CandidateKey {
    fn packet_body(&self, target: Target) -> Result<Vec<u8>> {
        match target {
            Target::Primary => key_body(self.cert.primary_key().key()),
            Target::Subkey => {
                let subkey = self.cert.keys().subkeys().next().ok_or_else(|| {
                    Error::UnsupportedPacket("candidate key has no subkey".into())
                })?;
                key_body(subkey.key())
            }
        }
    }
}

/// `version || be32(created) || algorithm || public MPIs`, the body hashed
/// into a v4 fingerprint.
pub fn key_body<P, R>(key: &Key<P, R>) -> Result<Vec<u8>>
where
    P: key::KeyParts,
    R: key::KeyRole,
{
    if key.version() != KEY_VERSION {
        return Err(Error::UnsupportedPacket(format!(
            "v{} keys have no SHA-1 fingerprint",
            key.version()
        )));
    }
    let created = key
        .creation_time()
        .duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|d| u32::try_from(d.as_secs()).ok())
        .ok_or_else(|| Error::UnsupportedPacket("creation time out of range".into()))?;
    let mpis = key.mpis().to_vec().map_err(Error::KeyGeneration)?;

    let mut body = Vec::with_capacity(6 + mpis.len());
    body.push(KEY_VERSION);
    body.extend_from_slice(&created.to_be_bytes());
    body.push(key.pk_algo().into());
    body.extend_from_slice(&mpis);
    Ok(body)
}

/// A candidate rewritten to its matched creation time.
#[derive(Debug, Clone)]
pub struct FinalizedKey {
    cert: Cert,
    timestamp: u32,
}

impl FinalizedKey {
    pub fn cert(&self) -> &Cert {
        &self.cert
    }

    pub fn into_cert(self) -> Cert {
        self.cert
    }

    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    pub fn fingerprint(&self) -> String {
        self.cert.fingerprint().to_hex()
    }

    pub fn subkey_fingerprint(&self) -> Option<String> {
        self.cert
            .keys()
            .subkeys()
            .next()
            .map(|ka| ka.key().fingerprint().to_hex())
    }

    /// Fingerprint of the key the search targeted.
    pub fn target_fingerprint(&self, target: Target) -> Option<String> {
        match target {
            Target::Primary => Some(self.fingerprint()),
            Target::Subkey => self.subkey_fingerprint(),
        }
    }

    pub fn write_public(&self, sink: &mut dyn std::io::Write) -> Result<()> {
        self.cert
            .armored()
            .serialize(sink)
            .map_err(|e| Error::Io(std::io::Error::other(e)))
    }

    pub fn write_secret(&self, sink: &mut dyn std::io::Write) -> Result<()> {
        self.cert
            .as_tsk()
            .armored()
            .serialize(sink)
            .map_err(|e| Error::Io(std::io::Error::other(e)))
    }
}

/// Moves every key of `candidate` to `timestamp` and re-signs all bindings
/// at that date.
pub fn finalize(candidate: &CandidateKey, timestamp: u32) -> Result<FinalizedKey> {
    let cert = rebuild(&candidate.cert, timestamp).map_err(Error::KeyFinalizationFailed)?;
    debug!(
        "Finalized {} at creation time {}",
        cert.fingerprint().to_hex(),
        timestamp
    );
    Ok(FinalizedKey { cert, timestamp })
}

fn rebuild(cert: &Cert, timestamp: u32) -> sequoia_openpgp::Result<Cert> {
    let created = UNIX_EPOCH + Duration::from_secs(timestamp.into());

    let primary_sigs: Vec<&Signature> = cert.primary_key().self_signatures().collect();
    let primary_flags = primary_sigs
        .iter()
        .find_map(|sig| sig.key_flags())
        .unwrap_or_else(|| KeyFlags::empty().set_certification());

    let mut primary = cert.primary_key().key().clone().parts_into_secret()?;
    primary.set_creation_time(created)?;
    let mut signer = primary.clone().into_keypair()?;

    let mut packets: Vec<Packet> = Vec::new();
    let direct = SignatureBuilder::new(SignatureType::DirectKey)
        .set_signature_creation_time(created)?
        .set_key_flags(primary_flags.clone())?
        .set_features(Features::sequoia())?;
    let direct = with_preferences(direct, &primary_sigs)?
        .sign_direct_key(&mut signer, primary.parts_as_public())?;
    packets.push(primary.clone().into());
    packets.push(direct.into());

    for (i, ua) in cert.userids().enumerate() {
        let userid = ua.userid().clone();
        let old: Vec<&Signature> = ua
            .self_signatures()
            .chain(primary_sigs.iter().copied())
            .collect();
        let mut builder = SignatureBuilder::new(SignatureType::PositiveCertification)
            .set_signature_creation_time(created)?
            .set_key_flags(primary_flags.clone())?
            .set_features(Features::sequoia())?;
        builder = with_preferences(builder, &old)?;
        if i == 0 {
            builder = builder.set_primary_userid(true)?;
        }
        let binding = builder.sign_userid_binding(&mut signer, primary.parts_as_public(), &userid)?;
        packets.push(userid.into());
        packets.push(binding.into());
    }

    for ka in cert.keys().subkeys() {
        let old: Vec<&Signature> = ka.self_signatures().collect();
        let flags = old
            .iter()
            .find_map(|sig| sig.key_flags())
            .unwrap_or_else(KeyFlags::empty);
        let mut subkey = ka.key().clone().parts_into_secret()?;
        subkey.set_creation_time(created)?;

        let mut builder = SignatureBuilder::new(SignatureType::SubkeyBinding)
            .set_signature_creation_time(created)?
            .set_key_flags(flags.clone())?;
        builder = with_preferences(builder, &old)?;
        if flags.for_signing() || flags.for_certification() {
            let mut subkey_signer = subkey.clone().into_keypair()?;
            let backsig = SignatureBuilder::new(SignatureType::PrimaryKeyBinding)
                .set_signature_creation_time(created)?
                .sign_primary_key_binding(&mut subkey_signer, &primary, &subkey)?;
            builder = builder.set_embedded_signature(backsig)?;
        }
        let binding = builder.sign_subkey_binding(&mut signer, primary.parts_as_public(), &subkey)?;
        packets.push(subkey.into());
        packets.push(binding.into());
    }

    // Round-trip through the wire format so every fingerprint is recomputed.
    let cert = Cert::from_packets(packets.into_iter())?;
    let bytes = cert.as_tsk().to_vec()?;
    Cert::from_bytes(&bytes)
}

/// Copies the algorithm preferences found on `old` onto a new binding.
fn with_preferences(
    mut builder: SignatureBuilder,
    old: &[&Signature],
) -> sequoia_openpgp::Result<SignatureBuilder> {
    if let Some(algos) = old.iter().find_map(|sig| sig.preferred_symmetric_algorithms()) {
        builder = builder.set_preferred_symmetric_algorithms(algos.to_vec())?;
    }
    if let Some(algos) = old.iter().find_map(|sig| sig.preferred_hash_algorithms()) {
        builder = builder.set_preferred_hash_algorithms(algos.to_vec())?;
    }
    if let Some(algos) = old
        .iter()
        .find_map(|sig| sig.preferred_compression_algorithms())
    {
        builder = builder.set_preferred_compression_algorithms(algos.to_vec())?;
    }
    Ok(builder)
}

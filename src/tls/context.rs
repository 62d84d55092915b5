// Copyright 2026 Matthew Ingwersen.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! Construction and configuration of TLS contexts.

use std::env;
use std::fmt;
use std::fs;
use std::path::Path;
use std::ptr;
use std::str::FromStr;

use foreign_types::ForeignType;
use log::{error, info};
use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::dh::Dh;
use openssl::ec::{Asn1Flag, EcGroup, EcKey};
use openssl::error::ErrorStack;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::PKey;
use openssl::ssl::{
    Ssl, SslContext, SslContextBuilder, SslFiletype, SslMethod, SslOptions, SslVersion,
};
use openssl::x509::{X509, X509Name};

use super::{init, Error};

/// The subject common name of the ephemeral server certificate.
pub(crate) const EPHEMERAL_COMMON_NAME: &str = "palisade.local";

/// Ephemeral certificates are valid for ten years from creation.
const EPHEMERAL_VALIDITY_DAYS: u32 = 3650;

/// The log target under which TLS pre-master secrets are emitted when
/// `SSLKEYLOGFILE` is set.
const SSLKEYLOG_TARGET: &str = "palisade::tls::sslkeylog";

/// Options applied to every context, client and server alike:
/// compression and session resumption on renegotiation are never
/// enabled.
fn common_options() -> SslOptions {
    SslOptions::NO_COMPRESSION | SslOptions::NO_SESSION_RESUMPTION_ON_RENEGOTIATION
}

/// Wraps a provider failure, recording the provider's error string.
pub(super) fn tls_error(stack: ErrorStack) -> Error {
    error!("error initializing TLS context: {}", stack);
    Error::from(stack)
}

////////////////////////////////////////////////////////////////////////
// PROTOCOL VERSIONS                                                  //
////////////////////////////////////////////////////////////////////////

/// A TLS protocol version the server can be configured with.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ProtocolVersion {
    Tls12,
    Tls13,
}

impl ProtocolVersion {
    /// Every version known to the configuration layer.
    const ALL: [ProtocolVersion; 2] = [ProtocolVersion::Tls12, ProtocolVersion::Tls13];

    /// Returns whether the TLS provider this build links against can
    /// enable and disable this version.
    pub fn supported(self) -> bool {
        !self.disable_bit().is_empty()
    }

    /// The provider option bit that *disables* this version.
    fn disable_bit(self) -> SslOptions {
        match self {
            Self::Tls12 => SslOptions::NO_TLSV1_2,
            Self::Tls13 => SslOptions::NO_TLSV1_3,
        }
    }

    /// The configuration name of this version.
    pub fn name(self) -> &'static str {
        match self {
            Self::Tls12 => "TLSv1.2",
            Self::Tls13 => "TLSv1.3",
        }
    }
}

impl FromStr for ProtocolVersion {
    type Err = ParseProtocolVersionError;

    /// Parses a configuration name such as `TLSv1.2`, without regard
    /// to ASCII case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|version| s.eq_ignore_ascii_case(version.name()))
            .ok_or(ParseProtocolVersionError)
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The error returned when parsing an unrecognized TLS protocol
/// version name.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ParseProtocolVersionError;

impl fmt::Display for ParseProtocolVersionError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("unrecognized TLS protocol version name")
    }
}

impl std::error::Error for ParseProtocolVersionError {}

/// A set of TLS protocol versions, passed to
/// [`TlsContextBuilder::set_protocols`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ProtocolVersions(u32);

impl ProtocolVersions {
    /// The set containing only TLS 1.2.
    pub const TLS12: Self = Self(1 << 0);

    /// The set containing only TLS 1.3.
    pub const TLS13: Self = Self(1 << 1);

    /// Returns whether the set is empty.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Returns whether every version in `other` is also in `self`.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }
}

impl From<ProtocolVersion> for ProtocolVersions {
    fn from(version: ProtocolVersion) -> Self {
        match version {
            ProtocolVersion::Tls12 => Self::TLS12,
            ProtocolVersion::Tls13 => Self::TLS13,
        }
    }
}

impl std::ops::BitOr for ProtocolVersions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for ProtocolVersions {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

////////////////////////////////////////////////////////////////////////
// CONTEXT CONSTRUCTION                                               //
////////////////////////////////////////////////////////////////////////

/// The identity a server context presents to its peers.
#[derive(Clone, Copy, Debug)]
pub enum ServerIdentity<'a> {
    /// Load a PEM certificate chain and a PEM private key from disk.
    Files { key: &'a Path, cert: &'a Path },

    /// Generate an in-memory P-256 key pair and a self-signed
    /// certificate. The certificate is solely the shell the protocol
    /// requires; deployments using it authenticate peers by other
    /// means (fixed addresses, or an external PKI not yet configured).
    Ephemeral,
}

/// A TLS context under construction.
///
/// A builder is created for the client or the server role, configured
/// through its methods, and frozen into an immutable [`TlsContext`]
/// with [`TlsContextBuilder::build`].
///
/// Every context starts from the same baseline: TLS 1.2 as the
/// minimum protocol version, compression and session resumption on
/// renegotiation disabled, and, if the `SSLKEYLOGFILE` environment
/// variable is set at creation time, pre-master secrets forwarded to
/// the logger at INFO under a dedicated target. (The variable's value
/// is not interpreted here; the logging sink decides the
/// destination.)
pub struct TlsContextBuilder {
    pub(super) ctx: SslContextBuilder,
}

impl TlsContextBuilder {
    /// Creates a context for the client role.
    pub fn client() -> Result<Self, Error> {
        init::initialize();
        let mut builder = Self {
            ctx: SslContextBuilder::new(SslMethod::tls_client()).map_err(tls_error)?,
        };
        builder.apply_policy().map_err(tls_error)?;
        Ok(builder)
    }

    /// Creates a context for the server role, presenting `identity`.
    pub fn server(identity: ServerIdentity<'_>) -> Result<Self, Error> {
        init::initialize();
        let mut builder = Self {
            ctx: SslContextBuilder::new(SslMethod::tls_server()).map_err(tls_error)?,
        };
        builder.apply_policy().map_err(tls_error)?;
        match identity {
            ServerIdentity::Files { key, cert } => {
                builder
                    .ctx
                    .set_certificate_chain_file(cert)
                    .map_err(tls_error)?;
                builder
                    .ctx
                    .set_private_key_file(key, SslFiletype::PEM)
                    .map_err(tls_error)?;
            }
            ServerIdentity::Ephemeral => builder.ephemeral_identity().map_err(tls_error)?,
        }
        Ok(builder)
    }

    /// Applies the baseline policy every context gets.
    fn apply_policy(&mut self) -> Result<(), ErrorStack> {
        self.ctx.set_options(common_options());
        self.ctx.set_min_proto_version(Some(SslVersion::TLS1_2))?;
        if env::var_os("SSLKEYLOGFILE").is_some() {
            self.ctx.set_keylog_callback(|_, line| {
                info!(target: SSLKEYLOG_TARGET, "{}", line);
            });
        }
        Ok(())
    }

    /// Generates and installs the ephemeral server identity: a P-256
    /// key pair (named curve, compressed points) and an X.509
    /// certificate with serial 1, ten years of validity, and a
    /// SHA-256 self-signature.
    fn ephemeral_identity(&mut self) -> Result<(), ErrorStack> {
        let mut group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1)?;
        group.set_asn1_flag(Asn1Flag::NAMED_CURVE);
        let key = PKey::from_ec_key(EcKey::generate(&group)?)?;

        let mut cert = X509::builder()?;
        let serial = BigNum::from_u32(1)?.to_asn1_integer()?;
        cert.set_serial_number(&serial)?;
        let not_before = Asn1Time::days_from_now(0)?;
        cert.set_not_before(&not_before)?;
        let not_after = Asn1Time::days_from_now(EPHEMERAL_VALIDITY_DAYS)?;
        cert.set_not_after(&not_after)?;
        cert.set_pubkey(&key)?;

        let mut name = X509Name::builder()?;
        name.append_entry_by_text("C", "AQ")?;
        name.append_entry_by_text("O", "Palisade ephemeral certificate")?;
        name.append_entry_by_text("CN", EPHEMERAL_COMMON_NAME)?;
        let name = name.build();
        cert.set_subject_name(&name)?;
        cert.set_issuer_name(&name)?;
        cert.sign(&key, MessageDigest::sha256())?;

        self.ctx.set_certificate(&cert.build())?;
        self.ctx.set_private_key(&key)?;
        Ok(())
    }

    /// Restricts the context to the protocol versions in `versions`.
    ///
    /// The provider exposes bits that *disable* individual protocol
    /// versions, so each version absent from `versions` has its
    /// disable bit set, and each version present has it cleared.
    ///
    /// # Panics
    ///
    /// `versions` must be non-empty, must contain only
    /// [`supported`](ProtocolVersion::supported) versions, and must
    /// not contain unknown bits. A violation means an unvalidated
    /// configuration reached this point, and panics.
    pub fn set_protocols(&mut self, versions: ProtocolVersions) {
        assert!(!versions.is_empty(), "no TLS protocol versions selected");

        let mut set = SslOptions::empty();
        let mut clear = SslOptions::empty();
        let mut remaining = versions;
        for version in ProtocolVersion::ALL {
            let flag = ProtocolVersions::from(version);
            if versions.contains(flag) {
                assert!(
                    version.supported(),
                    "{} is not supported by this build",
                    version,
                );
                clear |= version.disable_bit();
            } else {
                set |= version.disable_bit();
            }
            remaining.remove(flag);
        }
        assert!(remaining.is_empty(), "unknown TLS protocol versions selected");

        self.ctx.set_options(set);
        self.ctx.clear_options(clear);
    }

    /// Installs DH parameters from the PEM file at `path`, for the
    /// TLS 1.2 DHE key exchange. Returns whether the parameters were
    /// read, parsed, and installed.
    pub fn load_dhparams(&mut self, path: &Path) -> bool {
        let pem = match fs::read(path) {
            Ok(pem) => pem,
            Err(_) => return false,
        };
        let dh = match Dh::params_from_pem(&pem) {
            Ok(dh) => dh,
            Err(_) => return false,
        };
        self.ctx.set_tmp_dh(&dh).is_ok()
    }

    /// Installs `cipherlist` as the context's TLS 1.2 cipher list.
    ///
    /// # Panics
    ///
    /// The list must be non-empty and must already have been checked
    /// with [`valid_cipherlist`]; rejection by the provider here
    /// panics.
    pub fn set_cipherlist(&mut self, cipherlist: &str) {
        assert!(!cipherlist.is_empty(), "empty cipher list");
        self.ctx
            .set_cipher_list(cipherlist)
            .expect("pre-validated cipher list rejected by the TLS provider");
    }

    /// Controls whether the server's cipher preferences take priority
    /// over the client's.
    pub fn prefer_server_ciphers(&mut self, prefer: bool) {
        if prefer {
            self.ctx.set_options(SslOptions::CIPHER_SERVER_PREFERENCE);
        } else {
            self.ctx.clear_options(SslOptions::CIPHER_SERVER_PREFERENCE);
        }
    }

    /// Controls whether the context issues and accepts session
    /// tickets ([RFC 5077]).
    ///
    /// [RFC 5077]: https://datatracker.ietf.org/doc/html/rfc5077
    pub fn session_tickets(&mut self, enable: bool) {
        if enable {
            self.ctx.clear_options(SslOptions::NO_TICKET);
        } else {
            self.ctx.set_options(SslOptions::NO_TICKET);
        }
    }

    /// Freezes the configuration into an immutable [`TlsContext`].
    pub fn build(self) -> TlsContext {
        TlsContext {
            ctx: self.ctx.build(),
        }
    }
}

/// Checks whether the TLS provider accepts `cipherlist` as a TLS 1.2
/// cipher list, using a throwaway server context as the probe.
pub fn valid_cipherlist(cipherlist: &str) -> bool {
    init::initialize();
    if cipherlist.is_empty() {
        return false;
    }
    match SslContextBuilder::new(SslMethod::tls_server()) {
        Ok(mut probe) => probe.set_cipher_list(cipherlist).is_ok(),
        Err(_) => false,
    }
}

/// A configured, immutable TLS context.
///
/// The provider context underneath is reference-counted: cloning a
/// `TlsContext` is cheap and yields a handle aliasing the same
/// context. Once a context is published (for example through a
/// [`TlsContextCache`](super::TlsContextCache)), its configuration
/// never changes, so handles may be used from any thread without
/// further synchronization.
#[derive(Clone)]
pub struct TlsContext {
    pub(super) ctx: SslContext,
}

impl TlsContext {
    /// Creates the TLS state object for a single connection, attached
    /// to this context. The caller drives I/O on it.
    pub fn new_session(&self) -> Result<Ssl, Error> {
        Ssl::new(&self.ctx).map_err(tls_error)
    }

    /// Returns whether `self` and `other` are handles to the same
    /// underlying context.
    pub fn ptr_eq(&self, other: &TlsContext) -> bool {
        ptr::eq(self.ctx.as_ptr(), other.ctx.as_ptr())
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::net::{TcpListener, TcpStream};
    use std::thread;

    use super::super::testutil::handshake;
    use super::*;

    fn both_versions() -> ProtocolVersions {
        ProtocolVersions::TLS12 | ProtocolVersions::TLS13
    }

    #[test]
    fn client_context_builds_and_creates_sessions() {
        let mut builder = TlsContextBuilder::client().unwrap();
        builder.set_protocols(both_versions());
        let ctx = builder.build();
        ctx.new_session().unwrap();
        ctx.new_session().unwrap();
    }

    #[test]
    fn protocol_version_names_parse() {
        assert_eq!("TLSv1.2".parse(), Ok(ProtocolVersion::Tls12));
        assert_eq!("tlsv1.3".parse(), Ok(ProtocolVersion::Tls13));
        assert_eq!(
            "SSLv3".parse::<ProtocolVersion>(),
            Err(ParseProtocolVersionError),
        );
    }

    #[test]
    fn protocol_mask_sets_and_clears_disable_bits() {
        let mut builder = TlsContextBuilder::client().unwrap();

        builder.set_protocols(ProtocolVersions::TLS12);
        assert!(builder.ctx.options().contains(SslOptions::NO_TLSV1_3));
        assert!(!builder.ctx.options().contains(SslOptions::NO_TLSV1_2));

        builder.set_protocols(ProtocolVersions::TLS13);
        assert!(builder.ctx.options().contains(SslOptions::NO_TLSV1_2));
        assert!(!builder.ctx.options().contains(SslOptions::NO_TLSV1_3));

        builder.set_protocols(both_versions());
        assert!(!builder.ctx.options().contains(SslOptions::NO_TLSV1_2));
        assert!(!builder.ctx.options().contains(SslOptions::NO_TLSV1_3));
    }

    #[test]
    fn protocol_mask_drives_handshake() {
        let mut server = TlsContextBuilder::server(ServerIdentity::Ephemeral).unwrap();
        server.set_protocols(ProtocolVersions::TLS13);
        let server = server.build();

        let mut client = TlsContextBuilder::client().unwrap();
        client.set_protocols(ProtocolVersions::TLS12);
        let client = client.build();

        let (server_outcome, client_outcome) = handshake(&server, &client);
        assert!(server_outcome.is_err());
        assert!(client_outcome.is_err());

        let mut server = TlsContextBuilder::server(ServerIdentity::Ephemeral).unwrap();
        server.set_protocols(both_versions());
        let server = server.build();

        let mut client = TlsContextBuilder::client().unwrap();
        client.set_protocols(both_versions());
        let client = client.build();

        let (server_outcome, client_outcome) = handshake(&server, &client);
        assert!(server_outcome.is_ok());
        assert!(client_outcome.is_ok());
    }

    #[test]
    fn ephemeral_identity_certificate() {
        let server = TlsContextBuilder::server(ServerIdentity::Ephemeral)
            .unwrap()
            .build();
        let client = TlsContextBuilder::client().unwrap().build();

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            server.new_session().unwrap().accept(stream).map(|_| ())
        });
        let stream = TcpStream::connect(addr).unwrap();
        let stream = client.new_session().unwrap().connect(stream).unwrap();
        let cert = stream.ssl().peer_certificate().unwrap();
        accept.join().unwrap().unwrap();

        let cn = cert
            .subject_name()
            .entries_by_nid(Nid::COMMONNAME)
            .next()
            .unwrap();
        assert_eq!(cn.data().as_slice(), EPHEMERAL_COMMON_NAME.as_bytes());
        let issuer_cn = cert
            .issuer_name()
            .entries_by_nid(Nid::COMMONNAME)
            .next()
            .unwrap();
        assert_eq!(issuer_cn.data().as_slice(), EPHEMERAL_COMMON_NAME.as_bytes());

        let serial = cert.serial_number().to_bn().unwrap();
        assert_eq!(serial, BigNum::from_u32(1).unwrap());

        // The certificate was just minted, so at least nine of its
        // ten years of validity must remain.
        let now = Asn1Time::days_from_now(0).unwrap();
        let remaining = now.diff(cert.not_after()).unwrap();
        assert!(remaining.days >= 9 * 365);
    }

    #[test]
    fn server_with_missing_files_fails() {
        let result = TlsContextBuilder::server(ServerIdentity::Files {
            key: Path::new("/nonexistent/server.key"),
            cert: Path::new("/nonexistent/server.crt"),
        });
        assert!(result.is_err());
    }

    #[test]
    fn cipherlist_validation() {
        assert!(valid_cipherlist("HIGH:!aNULL"));
        assert!(!valid_cipherlist(""));
        assert!(!valid_cipherlist("NOT-A-CIPHER"));

        let mut builder = TlsContextBuilder::server(ServerIdentity::Ephemeral).unwrap();
        builder.set_cipherlist("HIGH:!aNULL");
    }

    #[test]
    fn dhparams_load_and_reject() {
        let mut builder = TlsContextBuilder::server(ServerIdentity::Ephemeral).unwrap();

        let pem = Dh::get_2048_256().unwrap().params_to_pem().unwrap();
        let path = env::temp_dir().join(format!("palisade-dhparams-{}.pem", std::process::id()));
        fs::write(&path, pem).unwrap();
        assert!(builder.load_dhparams(&path));
        fs::remove_file(&path).unwrap();

        assert!(!builder.load_dhparams(Path::new("/nonexistent/dhparams.pem")));

        let garbage = env::temp_dir().join(format!("palisade-garbage-{}.pem", std::process::id()));
        fs::write(&garbage, b"not pem at all").unwrap();
        assert!(!builder.load_dhparams(&garbage));
        fs::remove_file(&garbage).unwrap();
    }

    #[test]
    fn option_toggles_flip_single_bits() {
        let mut builder = TlsContextBuilder::server(ServerIdentity::Ephemeral).unwrap();

        builder.prefer_server_ciphers(true);
        assert!(builder
            .ctx
            .options()
            .contains(SslOptions::CIPHER_SERVER_PREFERENCE));
        builder.prefer_server_ciphers(false);
        assert!(!builder
            .ctx
            .options()
            .contains(SslOptions::CIPHER_SERVER_PREFERENCE));

        builder.session_tickets(false);
        assert!(builder.ctx.options().contains(SslOptions::NO_TICKET));
        builder.session_tickets(true);
        assert!(!builder.ctx.options().contains(SslOptions::NO_TICKET));
    }
}

//! # TLS Material
//!
//! Certificate issuance and rustls configuration for the authenticated
//! stages. Identities are self-signed ECDSA P-256 certificates with
//! `localhost`/`127.0.0.1` subject alternative names, written next to the
//! database as `<name>_cert.pem` / `<name>_key.pem`. Clients learn the
//! Bank's certificate through the Setup stage (and a merchant's through
//! Get) — trust-on-first-use by construction; a production deployment
//! would pin certificates out of band instead.
//!
//! Only server authentication is configured. Client identity in this
//! protocol is cryptographic (profiles and coins), not transport-level.

use rustls::pki_types::ServerName;
use rustls::RootCertStore;
pub use rustls::{ClientConfig, ServerConfig};
use std::path::Path;
use std::sync::Arc;

use crate::error::{CashError, Result};

/// Subject alternative names on every issued certificate. Verification
/// always targets `localhost`; deployments that need real hostnames swap
/// the certificate, not the protocol.
const SUBJECT_ALT_NAMES: [&str; 2] = ["localhost", "127.0.0.1"];

/// Generates a self-signed certificate for `name` and writes the
/// `<name>_cert.pem` / `<name>_key.pem` pair into `dir`.
pub fn create_certificate(dir: &Path, name: &str) -> Result<()> {
    let rcgen::CertifiedKey { cert, key_pair } = rcgen::generate_simple_self_signed(
        SUBJECT_ALT_NAMES.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
    )
    .map_err(|e| CashError::Tls(e.to_string()))?;

    std::fs::write(crate::config::cert_path(dir, name), cert.pem())?;

    let key_file = crate::config::key_path(dir, name);
    std::fs::write(&key_file, key_pair.serialize_pem())?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&key_file, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

/// Builds a server configuration from PEM-encoded certificate and key.
pub fn server_config_from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Arc<ServerConfig>> {
    let certs = rustls_pemfile::certs(&mut &cert_pem[..])
        .collect::<std::io::Result<Vec<_>>>()?;
    let key = rustls_pemfile::private_key(&mut &key_pem[..])?
        .ok_or_else(|| CashError::Tls("no private key in pem".into()))?;
    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    Ok(Arc::new(config))
}

/// Builds a server configuration from the PEM files issued by
/// [`create_certificate`].
pub fn load_server_config(cert_file: &Path, key_file: &Path) -> Result<Arc<ServerConfig>> {
    let cert_pem = std::fs::read(cert_file)?;
    let key_pem = std::fs::read(key_file)?;
    server_config_from_pem(&cert_pem, &key_pem)
}

/// Builds a client configuration that trusts exactly the given PEM
/// certificate — the one Setup (or Get) delivered.
pub fn client_config_from_pem(cert_pem: &[u8]) -> Result<Arc<ClientConfig>> {
    let mut roots = RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut &cert_pem[..]) {
        roots.add(cert?)?;
    }
    if roots.is_empty() {
        return Err(CashError::Tls("no certificate in pem".into()));
    }
    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(Arc::new(config))
}

/// Builds a client configuration from a stored certificate file.
pub fn load_client_config(cert_file: &Path) -> Result<Arc<ClientConfig>> {
    let cert_pem = std::fs::read(cert_file)?;
    client_config_from_pem(&cert_pem)
}

/// The server name every connection verifies against. Certificates are
/// issued for `localhost` regardless of the dialed address.
pub fn server_name() -> ServerName<'static> {
    ServerName::try_from("localhost").expect("static server name is valid")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio_rustls::{TlsAcceptor, TlsConnector};

    #[test]
    fn issued_pem_files_parse_back() {
        let dir = tempfile::tempdir().unwrap();
        create_certificate(dir.path(), "main").unwrap();
        let server = load_server_config(
            &crate::config::cert_path(dir.path(), "main"),
            &crate::config::key_path(dir.path(), "main"),
        );
        assert!(server.is_ok());
        let client =
            load_client_config(&crate::config::cert_path(dir.path(), "main"));
        assert!(client.is_ok());
    }

    #[test]
    fn garbage_pem_is_rejected() {
        assert!(client_config_from_pem(b"not a pem").is_err());
    }

    #[tokio::test]
    async fn loopback_handshake_and_echo() {
        let dir = tempfile::tempdir().unwrap();
        create_certificate(dir.path(), "main").unwrap();
        let server_config = load_server_config(
            &crate::config::cert_path(dir.path(), "main"),
            &crate::config::key_path(dir.path(), "main"),
        )
        .unwrap();
        let client_config =
            load_client_config(&crate::config::cert_path(dir.path(), "main")).unwrap();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let acceptor = TlsAcceptor::from(server_config);

        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut tls = acceptor.accept(tcp).await.unwrap();
            let mut buf = [0u8; 5];
            tls.read_exact(&mut buf).await.unwrap();
            tls.write_all(&buf).await.unwrap();
            tls.shutdown().await.unwrap();
        });

        let tcp = tokio::net::TcpStream::connect(addr).await.unwrap();
        let connector = TlsConnector::from(client_config);
        let mut tls = connector.connect(server_name(), tcp).await.unwrap();
        tls.write_all(b"aurum").await.unwrap();
        let mut echo = [0u8; 5];
        tls.read_exact(&mut echo).await.unwrap();
        assert_eq!(&echo, b"aurum");

        server.await.unwrap();
    }
}

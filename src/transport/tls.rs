//! TLS StreamLayer implementation
//!
//! Server side only: TLS 1.3, and every client must present a certificate
//! signed by the configured CA.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::server::WebPkiClientVerifier;
use tokio_rustls::rustls::{self, RootCertStore, ServerConfig};
use tokio_rustls::TlsAcceptor;

use crate::common::{Result, Stream};
use crate::error::Error;

use super::StreamLayer;

/// Certificate material for the TLS front-end (all PEM files)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsOptions {
    /// Server private key
    pub private_key: PathBuf,
    /// Server certificate chain
    pub server_cert: PathBuf,
    /// CA used to verify client certificates
    pub ca_cert: PathBuf,
}

/// Mutual-TLS server layer
pub struct TlsLayer {
    acceptor: TlsAcceptor,
}

impl TlsLayer {
    pub fn new(options: &TlsOptions) -> Result<Self> {
        let certs = load_certs(&options.server_cert)?;
        let key = load_private_key(&options.private_key)?;

        let mut roots = RootCertStore::empty();
        for ca in load_certs(&options.ca_cert)? {
            roots
                .add(ca)
                .map_err(|e| Error::Tls(format!("Invalid CA certificate: {}", e)))?;
        }

        let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
            .build()
            .map_err(|e| Error::Tls(format!("Failed to build client verifier: {}", e)))?;

        let config = ServerConfig::builder_with_protocol_versions(&[&rustls::version::TLS13])
            .with_client_cert_verifier(verifier)
            .with_single_cert(certs, key)
            .map_err(|e| Error::Tls(format!("Invalid server certificate or key: {}", e)))?;

        Ok(Self {
            acceptor: TlsAcceptor::from(Arc::new(config)),
        })
    }
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path).map_err(|e| {
        Error::Config(format!(
            "Failed to open certificate file {}: {}",
            path.display(),
            e
        ))
    })?;
    let mut reader = BufReader::new(file);
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Config(format!("Failed to parse certificates: {}", e)))?;

    if certs.is_empty() {
        return Err(Error::Config(format!(
            "No certificate found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let file = File::open(path).map_err(|e| {
        Error::Config(format!("Failed to open key file {}: {}", path.display(), e))
    })?;
    let mut reader = BufReader::new(file);

    let items = rustls_pemfile::read_all(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Config(format!("Failed to parse private key: {}", e)))?;

    for item in items {
        match item {
            rustls_pemfile::Item::Pkcs8Key(key) => return Ok(PrivateKeyDer::Pkcs8(key)),
            rustls_pemfile::Item::Pkcs1Key(key) => return Ok(PrivateKeyDer::Pkcs1(key)),
            rustls_pemfile::Item::Sec1Key(key) => return Ok(PrivateKeyDer::Sec1(key)),
            _ => continue,
        }
    }

    Err(Error::Config(format!(
        "No valid private key found in {}",
        path.display()
    )))
}

#[async_trait]
impl StreamLayer for TlsLayer {
    async fn wrap_server(&self, stream: Stream) -> Result<Stream> {
        let tls_stream = self
            .acceptor
            .accept(stream)
            .await
            .map_err(|e| Error::Tls(format!("handshake failed: {}", e)))?;
        Ok(Box::new(tls_stream))
    }

    fn name(&self) -> &'static str {
        "tls"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{event_channel, EventKind, ServerStream, Side, SocketServerStream};
    use std::io::Write;
    use tempfile::NamedTempFile;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio_rustls::rustls::pki_types::ServerName;
    use tokio_rustls::rustls::ClientConfig;
    use tokio_rustls::TlsConnector;

    fn pem_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_missing_files() {
        let options = TlsOptions {
            private_key: "/nonexistent/server.key".into(),
            server_cert: "/nonexistent/server.crt".into(),
            ca_cert: "/nonexistent/ca.crt".into(),
        };
        match TlsLayer::new(&options) {
            Err(Error::Config(msg)) => assert!(msg.contains("server.crt")),
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("layer built from missing files"),
        }
    }

    #[test]
    fn test_file_without_certificates() {
        let empty = pem_file("not a certificate\n");
        let err = load_certs(empty.path()).unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("No certificate")));
    }

    #[test]
    fn test_file_without_key() {
        let cert_only = pem_file("-----BEGIN CERTIFICATE-----\nAAAA\n-----END CERTIFICATE-----\n");
        let err = load_private_key(cert_only.path()).unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("No valid private key")));
    }

    /// CA plus one server and one client certificate it signed
    struct Pki {
        ca_cert: NamedTempFile,
        server_cert: NamedTempFile,
        server_key: NamedTempFile,
        client_cert: NamedTempFile,
        client_key: NamedTempFile,
    }

    impl Pki {
        fn generate() -> Self {
            use rcgen::{
                BasicConstraints, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa,
                KeyPair, KeyUsagePurpose,
            };

            let ca_key = KeyPair::generate().unwrap();
            let mut ca_params = CertificateParams::new(Vec::<String>::new()).unwrap();
            ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
            ca_params.key_usages = vec![
                KeyUsagePurpose::KeyCertSign,
                KeyUsagePurpose::DigitalSignature,
                KeyUsagePurpose::CrlSign,
            ];
            ca_params
                .distinguished_name
                .push(DnType::CommonName, "amgi test ca");
            let ca = ca_params.self_signed(&ca_key).unwrap();

            let leaf = |name: &str, usage: ExtendedKeyUsagePurpose| {
                let key = KeyPair::generate().unwrap();
                let mut params = CertificateParams::new(vec![name.to_string()]).unwrap();
                params.distinguished_name.push(DnType::CommonName, name);
                params.extended_key_usages = vec![usage];
                let cert = params.signed_by(&key, &ca, &ca_key).unwrap();
                (pem_file(&cert.pem()), pem_file(&key.serialize_pem()))
            };

            let (server_cert, server_key) = leaf("localhost", ExtendedKeyUsagePurpose::ServerAuth);
            let (client_cert, client_key) = leaf("client", ExtendedKeyUsagePurpose::ClientAuth);

            Self {
                ca_cert: pem_file(&ca.pem()),
                server_cert,
                server_key,
                client_cert,
                client_key,
            }
        }

        fn layer(&self) -> TlsLayer {
            TlsLayer::new(&TlsOptions {
                private_key: self.server_key.path().into(),
                server_cert: self.server_cert.path().into(),
                ca_cert: self.ca_cert.path().into(),
            })
            .unwrap()
        }

        fn connector(
            &self,
            versions: &[&'static rustls::SupportedProtocolVersion],
            with_cert: bool,
        ) -> TlsConnector {
            let mut roots = RootCertStore::empty();
            for ca in load_certs(self.ca_cert.path()).unwrap() {
                roots.add(ca).unwrap();
            }

            let builder = ClientConfig::builder_with_protocol_versions(versions)
                .with_root_certificates(roots);
            let config = if with_cert {
                builder
                    .with_client_auth_cert(
                        load_certs(self.client_cert.path()).unwrap(),
                        load_private_key(self.client_key.path()).unwrap(),
                    )
                    .unwrap()
            } else {
                builder.with_no_client_auth()
            };
            TlsConnector::from(Arc::new(config))
        }
    }

    fn localhost() -> ServerName<'static> {
        ServerName::try_from("localhost").unwrap()
    }

    #[tokio::test]
    async fn test_handshake_with_client_certificate() {
        let pki = Pki::generate();
        let layer = pki.layer();
        let connector = pki.connector(&[&rustls::version::TLS13], true);
        let (server_io, client_io) = duplex(16 * 1024);

        let (server, client) = tokio::join!(
            layer.wrap_server(Box::new(server_io)),
            connector.connect(localhost(), client_io)
        );
        let mut server = server.unwrap();
        let mut client = client.unwrap();
        assert_eq!(
            client.get_ref().1.protocol_version(),
            Some(rustls::ProtocolVersion::TLSv1_3)
        );

        client.write_all(b"hello").await.unwrap();
        client.flush().await.unwrap();
        let mut buf = [0u8; 5];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[tokio::test]
    async fn test_handshake_without_client_certificate_fails() {
        let pki = Pki::generate();
        let layer = pki.layer();
        let connector = pki.connector(&[&rustls::version::TLS13], false);
        let (server_io, client_io) = duplex(16 * 1024);

        let (server, _client) = tokio::join!(
            layer.wrap_server(Box::new(server_io)),
            connector.connect(localhost(), client_io)
        );
        assert!(matches!(server, Err(Error::Tls(_))));
    }

    #[tokio::test]
    async fn test_handshake_rejects_tls12() {
        let pki = Pki::generate();
        let layer = pki.layer();
        let connector = pki.connector(&[&rustls::version::TLS12], true);
        let (server_io, client_io) = duplex(16 * 1024);

        let (server, client) = tokio::join!(
            layer.wrap_server(Box::new(server_io)),
            connector.connect(localhost(), client_io)
        );
        assert!(matches!(server, Err(Error::Tls(_))));
        assert!(client.is_err());
    }

    #[tokio::test]
    async fn test_server_stream_handshakes_before_reading() {
        let pki = Pki::generate();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let connector = pki.connector(&[&rustls::version::TLS13], true);
        let client = tokio::spawn(async move {
            let tcp = TcpStream::connect(addr).await.unwrap();
            let mut tls = connector.connect(localhost(), tcp).await.unwrap();
            tls.write_all(b"\x05\x01\x00").await.unwrap();
            tls.flush().await.unwrap();
            tls
        });
        let (accepted, peer) = listener.accept().await.unwrap();

        let (events_tx, mut events_rx) = event_channel();
        let mut stream = SocketServerStream::new(
            12,
            Box::new(accepted),
            peer,
            Arc::new(pki.layer()),
            events_tx,
        );
        stream.start();

        let event = events_rx.recv().await.unwrap();
        assert_eq!((event.id, event.side), (12, Side::Server));
        match event.kind {
            EventKind::Read(frame) => assert_eq!(&frame[..], b"\x05\x01\x00"),
            other => panic!("unexpected event: {:?}", other),
        }
        stream.stop();
        drop(client.await.unwrap());
    }

    #[test]
    fn test_options_from_json() {
        let options: TlsOptions = serde_json::from_str(
            r#"{"private_key":"k.pem","server_cert":"s.pem","ca_cert":"ca.pem"}"#,
        )
        .unwrap();
        assert_eq!(options.ca_cert, PathBuf::from("ca.pem"));
    }
}

use std::fs::File;
use std::io::{self, BufReader, ErrorKind};
use std::sync::Arc;

use pgwire::tokio::tokio_rustls::rustls::ServerConfig;
use pgwire::tokio::tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use pgwire::tokio::TlsAcceptor;

use crate::config::Config;

/// TLS acceptor for the configured PEM pair, or `None` when TLS is off.
pub fn acceptor_for(config: &Config) -> io::Result<Option<TlsAcceptor>> {
    let (cert_path, key_path) = match (config.tls_cert.as_deref(), config.tls_key.as_deref()) {
        (None, None) => return Ok(None),
        (Some(c), Some(k)) => (c, k),
        _ => {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                "both SPACEBOOK_TLS_CERT and SPACEBOOK_TLS_KEY must be set, or neither",
            ));
        }
    };

    let mut server = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(read_certs(cert_path)?, read_key(key_path)?)
        .map_err(|e| io::Error::new(ErrorKind::InvalidInput, e))?;
    server.alpn_protocols = vec![b"postgresql".to_vec()];

    tracing::info!("tls enabled with certificate {cert_path}");
    Ok(Some(TlsAcceptor::from(Arc::new(server))))
}

fn read_certs(path: &str) -> io::Result<Vec<CertificateDer<'static>>> {
    let certs: Vec<_> =
        rustls_pemfile::certs(&mut BufReader::new(File::open(path)?)).collect::<Result<_, _>>()?;
    if certs.is_empty() {
        return Err(io::Error::new(
            ErrorKind::InvalidInput,
            format!("no certificates in {path}"),
        ));
    }
    Ok(certs)
}

fn read_key(path: &str) -> io::Result<PrivateKeyDer<'static>> {
    rustls_pemfile::private_key(&mut BufReader::new(File::open(path)?))?.ok_or_else(|| {
        io::Error::new(ErrorKind::InvalidInput, format!("no private key in {path}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_without_paths() {
        assert!(acceptor_for(&Config::default()).unwrap().is_none());
    }

    #[test]
    fn half_configured_is_rejected() {
        let config = Config {
            tls_cert: Some("/tmp/cert.pem".into()),
            ..Config::default()
        };
        let Err(err) = acceptor_for(&config) else {
            panic!("half TLS config accepted");
        };
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn empty_pem_has_no_certificates() {
        let dir = std::env::temp_dir().join("spacebook_test_tls");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("empty.pem");
        std::fs::write(&path, "").unwrap();
        let err = read_certs(path.to_str().unwrap()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(read_key(path.to_str().unwrap()).is_err());
        let _ = std::fs::remove_file(&path);
    }
}

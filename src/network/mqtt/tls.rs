//! TLS-конфигурация клиента с закреплённым корневым сертификатом.

use std::{path::Path, sync::Arc};

use rustls::{
    pki_types::{pem::PemObject, CertificateDer},
    ClientConfig, RootCertStore,
};
use tokio_rustls::TlsConnector;

use crate::error::ConfigError;

/// Строит `TlsConnector`, доверяющий только сертификатам из `pem`.
///
/// `origin` используется только в тексте ошибки (обычно путь к файлу).
pub fn connector_from_pem(
    pem: &[u8],
    origin: &str,
) -> Result<TlsConnector, ConfigError> {
    let certificate_error = |reason: String| ConfigError::Certificate {
        path: origin.to_string(),
        reason,
    };

    let certs = CertificateDer::pem_slice_iter(pem)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| certificate_error(format!("failed to parse certificates: {e}")))?;
    if certs.is_empty() {
        return Err(certificate_error("no certificates found".to_string()));
    }

    let mut roots = RootCertStore::empty();
    for cert in certs {
        roots
            .add(cert)
            .map_err(|e| certificate_error(format!("rejected root certificate: {e}")))?;
    }

    let config = ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| certificate_error(format!("client config error: {e}")))?
    .with_root_certificates(roots)
    .with_no_client_auth();

    Ok(TlsConnector::from(Arc::new(config)))
}

/// Читает PEM-файл с корневым сертификатом брокера.
pub fn connector_from_file(path: &Path) -> Result<TlsConnector, ConfigError> {
    let origin = path.display().to_string();
    let pem = std::fs::read(path).map_err(|e| ConfigError::Certificate {
        path: origin.clone(),
        reason: e.to_string(),
    })?;
    connector_from_pem(&pem, &origin)
}

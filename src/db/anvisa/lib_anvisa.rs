use std::{fs, io, path::PathBuf};

use reqwest::{
    blocking::Client,
    header::{ACCEPT, USER_AGENT},
    Certificate, StatusCode,
};
use csv::StringRecord;
use thiserror::Error;

use super::cleaning::RawRecord;

/// How the server certificate of dados.anvisa.gov.br gets verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertVerification {
    /// Use the transport's built-in roots.
    Enabled,
    /// Accept any certificate.
    Disabled,
    /// Trust only the certificates in this PEM bundle.
    CaBundle(PathBuf),
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("can't use CA bundle {path:?}: {reason}")]
    CaBundle { path: PathBuf, reason: String },
    #[error("HTTP error: {0}")]
    Status(StatusCode),
    #[error("connection error (certificate or network): {0}")]
    Connect(reqwest::Error),
    #[error("request error: {0}")]
    Request(reqwest::Error),
    #[error("failed to parse CSV: {0}")]
    Parse(#[from] csv::Error),
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() {
            FetchError::Connect(e)
        } else if let Some(status) = e.status() {
            FetchError::Status(status)
        } else {
            FetchError::Request(e)
        }
    }
}

fn read_bundle(path: &PathBuf) -> Result<Vec<Certificate>, FetchError> {
    let pem = fs::read(path).map_err(|e: io::Error| FetchError::CaBundle {
        path: path.clone(),
        reason: e.to_string(),
    })?;
    let certs = Certificate::from_pem_bundle(&pem).map_err(|e| FetchError::CaBundle {
        path: path.clone(),
        reason: e.to_string(),
    })?;
    if certs.is_empty() {
        return Err(FetchError::CaBundle {
            path: path.clone(),
            reason: "no certificates found".to_string(),
        });
    }
    Ok(certs)
}

/// Build a blocking client honoring the certificate setting.  Default timeouts.
pub fn build_client(cert: &CertVerification) -> Result<Client, FetchError> {
    let mut builder = Client::builder();
    match cert {
        CertVerification::Enabled => {}
        CertVerification::Disabled => builder = builder.danger_accept_invalid_certs(true),
        CertVerification::CaBundle(path) => {
            builder = builder.tls_built_in_root_certs(false);
            for cert in read_bundle(path)? {
                builder = builder.add_root_certificate(cert);
            }
        }
    }
    Ok(builder.build()?)
}

/// Get the body of a text resource.  One attempt, no retries.
pub fn download_text(url: &str, cert: &CertVerification) -> Result<String, FetchError> {
    let client = build_client(cert)?;
    let response = client
        .get(url)
        .header(USER_AGENT, "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36")
        .header(ACCEPT, "text/csv,text/plain,*/*")
        .send()?;
    if !response.status().is_success() {
        return Err(FetchError::Status(response.status()));
    }
    // The published files are Latin-1 and come without a charset.
    Ok(response.text_with_charset("ISO-8859-1")?)
}

/// Parse a semicolon delimited file with a header row.  Rows may be ragged:
/// short rows are padded with empty fields, extra fields are dropped.
pub fn parse_csv(body: &str) -> Result<Vec<RawRecord>, csv::Error> {
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(b';')
        .flexible(true)
        .has_headers(true)
        .from_reader(body.as_bytes());
    let headers = rdr.headers()?.clone();
    let n = headers.len();

    let mut out = Vec::new();
    for record in rdr.records() {
        let record = record?;
        let mut row: StringRecord = record.iter().take(n).collect();
        while row.len() < n {
            row.push_field("");
        }
        out.push(row.deserialize(Some(&headers))?);
    }
    Ok(out)
}

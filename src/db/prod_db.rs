use std::path::PathBuf;

use crate::db::anvisa::{lib_anvisa::CertVerification, manipulados_archive::ManipuladosArchive};

pub struct ProdDb {}

impl ProdDb {
    pub fn anvisa_manipulados() -> ManipuladosArchive {
        ManipuladosArchive {
            base_url: "https://dados.anvisa.gov.br/dados/SNGPC/Manipulados".to_string(),
            duckdb_path: "storage/anvisa.duckdb".to_string(),
            cert: CertVerification::CaBundle(PathBuf::from("./certs/ca_bundle.pem")),
        }
    }

    /// Where `train_forecast` writes the best model.
    pub fn forecast_checkpoint() -> String {
        "ml/modelo_autoregressivo.json".to_string()
    }
}

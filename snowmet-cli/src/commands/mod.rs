use anyhow::{Context, Result};
use snowmet::download::DownloadConfig;
use snowmet::filename::Product;
use snowmet::{SnowDepthService, SnowDepthServiceBuilder};
use std::path::PathBuf;

pub mod build;
pub mod depth;
pub mod fetch;
pub mod grid;
pub mod list;

/// Grid cache settings shared by every command.
pub struct GridOptions {
    pub cache_dir: PathBuf,
    pub cache_size: u64,
    pub offline: bool,
    pub snodas_url: Option<String>,
}

impl GridOptions {
    pub fn service(&self, product: Product) -> Result<SnowDepthService> {
        let mut builder = SnowDepthServiceBuilder::new(&self.cache_dir)
            .cache_size(self.cache_size)
            .product(product);

        if !self.offline {
            let config = match &self.snodas_url {
                Some(template) => DownloadConfig::with_url_template(template.clone()),
                None => DownloadConfig::default(),
            };
            builder = builder.auto_download(config);
        }

        builder.build().context("Failed to create snow depth service")
    }
}

pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

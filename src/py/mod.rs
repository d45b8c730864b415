pub mod extract;

use std::path::{Path, PathBuf};
use std::sync::mpsc;

use anyhow::{anyhow, Result};
use pyo3::prelude::*;
use tracing::debug;

use crate::table::Table;

enum HostRequest {
    ExtractText {
        pdf: PathBuf,
        max_pages: usize,
        reply: mpsc::Sender<Result<String>>,
    },
    TablePreview {
        pdf: PathBuf,
        max_pages: usize,
        max_rows: usize,
        reply: mpsc::Sender<Result<String>>,
    },
    RunParser {
        source: String,
        pdf: PathBuf,
        reply: mpsc::Sender<Result<Table>>,
    },
}

/// Gateway to the embedded Python interpreter. All Python work — PDF text
/// extraction and candidate parser execution — runs on a single dedicated
/// OS thread that holds the GIL, serving one request at a time over a
/// channel. Uses std::sync channels so the thread stays outside any tokio
/// runtime context; callers bridge with spawn_blocking.
pub struct PyHost {
    tx: mpsc::Sender<HostRequest>,
}

impl PyHost {
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::channel::<HostRequest>();

        std::thread::spawn(move || {
            Python::with_gil(|py| {
                debug!("Python host thread initialized");
                while let Ok(req) = rx.recv() {
                    match req {
                        HostRequest::ExtractText {
                            pdf,
                            max_pages,
                            reply,
                        } => {
                            let _ = reply.send(extract::page_text(py, &pdf, max_pages));
                        }
                        HostRequest::TablePreview {
                            pdf,
                            max_pages,
                            max_rows,
                            reply,
                        } => {
                            let _ =
                                reply.send(extract::table_preview(py, &pdf, max_pages, max_rows));
                        }
                        HostRequest::RunParser { source, pdf, reply } => {
                            let _ = reply.send(extract::run_candidate(py, &source, &pdf));
                        }
                    }
                }
                debug!("Python host thread shutting down");
            });
        });

        Self { tx }
    }

    /// Page-level text from the sample PDF, used as the prompt excerpt.
    pub async fn extract_text(&self, pdf: &Path, max_pages: usize) -> Result<String> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.tx
            .send(HostRequest::ExtractText {
                pdf: pdf.to_path_buf(),
                max_pages,
                reply: reply_tx,
            })
            .map_err(|_| anyhow!("Python host thread died"))?;
        Self::await_reply(reply_rx).await
    }

    /// Raw extracted-table rows from the PDF, rendered for log inspection.
    pub async fn table_preview(
        &self,
        pdf: &Path,
        max_pages: usize,
        max_rows: usize,
    ) -> Result<String> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.tx
            .send(HostRequest::TablePreview {
                pdf: pdf.to_path_buf(),
                max_pages,
                max_rows,
                reply: reply_tx,
            })
            .map_err(|_| anyhow!("Python host thread died"))?;
        Self::await_reply(reply_rx).await
    }

    /// Load candidate parser source as a fresh module and run
    /// `parse(pdf_path)`. Any load or runtime fault comes back as `Err`
    /// with the Python exception text; the host itself never panics.
    pub async fn run_parser(&self, source: &str, pdf: &Path) -> Result<Table> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.tx
            .send(HostRequest::RunParser {
                source: source.to_string(),
                pdf: pdf.to_path_buf(),
                reply: reply_tx,
            })
            .map_err(|_| anyhow!("Python host thread died"))?;
        Self::await_reply(reply_rx).await
    }

    async fn await_reply<T: Send + 'static>(reply_rx: mpsc::Receiver<Result<T>>) -> Result<T> {
        tokio::task::spawn_blocking(move || {
            reply_rx
                .recv()
                .map_err(|_| anyhow!("Python host reply channel closed"))?
        })
        .await?
    }
}

// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Native OS spooler backend, RAW datatype.
//
// Windows talks to winspool directly on a blocking thread.  Elsewhere the
// job goes to CUPS as a raw job (`lp -d <printer> -o raw`) so the spooler
// does not try to filter label languages.

use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use printagent_core::error::{AgentError, Result};

use super::PrinterBackend;

#[derive(Debug, Clone)]
pub struct NativeBackend {
    printer: String,
    timeout: Duration,
}

impl NativeBackend {
    /// `printer` is the OS-level printer or queue name.
    pub fn new(printer: impl Into<String>, timeout: Duration) -> Self {
        Self {
            printer: printer.into(),
            timeout,
        }
    }

    /// Argument vector used to submit a raw CUPS job.
    pub fn cups_argv(&self) -> Vec<String> {
        vec![
            "lp".into(),
            "-d".into(),
            self.printer.clone(),
            "-o".into(),
            "raw".into(),
        ]
    }
}

#[async_trait]
impl PrinterBackend for NativeBackend {
    async fn send(&self, payload: &[u8]) -> Result<()> {
        if self.printer.is_empty() {
            return Err(AgentError::InvalidPrinterConfig(
                "native printer needs an OS printer name".into(),
            ));
        }
        info!(printer = %self.printer, bytes = payload.len(), "submitting raw spooler job");
        self.submit(payload).await
    }
}

#[cfg(not(windows))]
impl NativeBackend {
    async fn submit(&self, payload: &[u8]) -> Result<()> {
        super::command::run_with_stdin(&self.cups_argv(), payload, self.timeout)
            .await
            .map_err(AgentError::Spooler)
    }
}

#[cfg(windows)]
impl NativeBackend {
    async fn submit(&self, payload: &[u8]) -> Result<()> {
        let printer = self.printer.clone();
        let data = payload.to_vec();
        let job = tokio::task::spawn_blocking(move || winspool::print_raw(&printer, &data));

        tokio::time::timeout(self.timeout, job)
            .await
            .map_err(|_| {
                AgentError::Spooler(format!(
                    "spooler did not accept the job within {}s",
                    self.timeout.as_secs_f64()
                ))
            })?
            .map_err(|e| AgentError::Spooler(format!("spooler task: {e}")))?
    }
}

#[cfg(windows)]
mod winspool {
    use std::ffi::c_void;

    use windows_sys::Win32::Graphics::Printing::{
        ClosePrinter, DOC_INFO_1W, EndDocPrinter, EndPagePrinter, OpenPrinterW,
        StartDocPrinterW, StartPagePrinter, WritePrinter,
    };

    use printagent_core::error::{AgentError, Result};

    fn wide(s: &str) -> Vec<u16> {
        s.encode_utf16().chain(std::iter::once(0)).collect()
    }

    fn spooler_err(call: &str, printer: &str) -> AgentError {
        AgentError::Spooler(format!(
            "{call} failed for '{printer}': {}",
            std::io::Error::last_os_error()
        ))
    }

    /// OpenPrinter / StartDoc(RAW) / StartPage / WritePrinter / EndPage /
    /// EndDoc / ClosePrinter.  The handle is closed on every path.
    pub fn print_raw(printer: &str, data: &[u8]) -> Result<()> {
        let name = wide(printer);
        let mut doc_name = wide("print-agent");
        let mut datatype = wide("RAW");

        let mut handle: *mut c_void = std::ptr::null_mut();
        // SAFETY: `name` is NUL-terminated and outlives the call.
        if unsafe { OpenPrinterW(name.as_ptr(), &mut handle, std::ptr::null()) } == 0 {
            return Err(spooler_err("OpenPrinter", printer));
        }

        let doc = DOC_INFO_1W {
            pDocName: doc_name.as_mut_ptr(),
            pOutputFile: std::ptr::null_mut(),
            pDatatype: datatype.as_mut_ptr(),
        };

        // SAFETY: `handle` is a valid printer handle until ClosePrinter below;
        // `doc` and its strings outlive every call.
        let result = unsafe {
            if StartDocPrinterW(handle, 1, &doc) == 0 {
                Err(spooler_err("StartDocPrinter", printer))
            } else {
                let written = if StartPagePrinter(handle) == 0 {
                    Err(spooler_err("StartPagePrinter", printer))
                } else {
                    let w = write_all(handle, data, printer);
                    EndPagePrinter(handle);
                    w
                };
                if EndDocPrinter(handle) == 0 && written.is_ok() {
                    Err(spooler_err("EndDocPrinter", printer))
                } else {
                    written
                }
            }
        };

        // SAFETY: opened above, closed exactly once.
        unsafe {
            ClosePrinter(handle);
        }
        result
    }

    /// # Safety
    /// `handle` must be an open printer handle inside a started page.
    unsafe fn write_all(handle: *mut c_void, data: &[u8], printer: &str) -> Result<()> {
        let mut offset = 0usize;
        while offset < data.len() {
            let chunk = &data[offset..];
            let len = u32::try_from(chunk.len()).unwrap_or(u32::MAX);
            let mut written = 0u32;
            // SAFETY: `chunk` holds at least `len` readable bytes.
            let ok = unsafe {
                WritePrinter(
                    handle,
                    chunk.as_ptr().cast::<c_void>(),
                    len,
                    &mut written,
                )
            };
            if ok == 0 || written == 0 {
                return Err(spooler_err("WritePrinter", printer));
            }
            offset += written as usize;
        }
        Ok(())
    }
}

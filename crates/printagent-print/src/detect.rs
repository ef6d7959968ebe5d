// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Enumeration of printers installed in the operating system.
//
// On Unix the CUPS queue list comes from `lpstat -a`; each queue is driven
// through `lp -d <queue>` when `lp` is available.  On Windows the spooler is
// asked directly (`EnumPrintersW`) and every printer is dispatched natively.

use std::ffi::OsString;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use printagent_core::error::{AgentError, Result};
use printagent_core::types::{PrinterDescriptor, PrinterKind, PrinterSource};

/// Upper bound on a single OS enumeration.
pub const DETECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Source of detected printers.
#[async_trait]
pub trait PrinterDetector: Send + Sync {
    /// Printers currently known to the OS.  Descriptors come back tagged
    /// [`PrinterSource::Detected`].
    async fn detect(&self) -> Result<Vec<PrinterDescriptor>>;
}

/// Used when detection is switched off in the configuration.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDetection;

#[async_trait]
impl PrinterDetector for NoDetection {
    async fn detect(&self) -> Result<Vec<PrinterDescriptor>> {
        Ok(Vec::new())
    }
}

/// A fixed, replaceable list of printers.
#[derive(Debug, Default)]
pub struct StaticDetector {
    printers: Mutex<Vec<PrinterDescriptor>>,
}

impl StaticDetector {
    pub fn new(printers: Vec<PrinterDescriptor>) -> Self {
        Self {
            printers: Mutex::new(printers),
        }
    }

    /// Replace the list, as if printers were plugged in or removed.
    pub fn set(&self, printers: Vec<PrinterDescriptor>) {
        if let Ok(mut current) = self.printers.lock() {
            *current = printers;
        }
    }
}

#[async_trait]
impl PrinterDetector for StaticDetector {
    async fn detect(&self) -> Result<Vec<PrinterDescriptor>> {
        let printers = self
            .printers
            .lock()
            .map_err(|_| AgentError::Detection("static printer list poisoned".into()))?
            .clone();
        Ok(printers
            .into_iter()
            .map(|mut p| {
                p.source = PrinterSource::Detected;
                p
            })
            .collect())
    }
}

/// Asks the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemDetector;

#[async_trait]
impl PrinterDetector for SystemDetector {
    #[cfg(unix)]
    async fn detect(&self) -> Result<Vec<PrinterDescriptor>> {
        let Some(output) = run_lpstat().await? else {
            debug!("lpstat not installed, no printers detected");
            return Ok(Vec::new());
        };
        let lp_available = lp_installed(std::env::var_os("PATH"));
        let printers = parse_lpstat(&output)
            .into_iter()
            .map(|name| descriptor_for_cups_queue(name, lp_available))
            .collect::<Vec<_>>();
        debug!(count = printers.len(), lp_available, "CUPS printers detected");
        Ok(printers)
    }

    #[cfg(windows)]
    async fn detect(&self) -> Result<Vec<PrinterDescriptor>> {
        let names = tokio::time::timeout(
            DETECT_TIMEOUT,
            tokio::task::spawn_blocking(win::enum_printers),
        )
        .await
        .map_err(|_| AgentError::Detection("EnumPrinters timed out".into()))?
        .map_err(|e| AgentError::Detection(format!("EnumPrinters task: {e}")))??;

        let printers = names
            .into_iter()
            .map(|name| {
                PrinterDescriptor::new(
                    name.clone(),
                    PrinterKind::Native {
                        printer: Some(name),
                    },
                    PrinterSource::Detected,
                )
            })
            .collect::<Vec<_>>();
        debug!(count = printers.len(), "spooler printers detected");
        Ok(printers)
    }

    #[cfg(not(any(unix, windows)))]
    async fn detect(&self) -> Result<Vec<PrinterDescriptor>> {
        Ok(Vec::new())
    }
}

// ---------------------------------------------------------------------------
// CUPS
// ---------------------------------------------------------------------------

/// Run `lpstat -a`.  `Ok(None)` when the tool is not installed.
#[cfg(unix)]
async fn run_lpstat() -> Result<Option<String>> {
    let child = tokio::process::Command::new("lpstat")
        .arg("-a")
        .stdin(std::process::Stdio::null())
        .kill_on_drop(true)
        .output();

    let output = match tokio::time::timeout(DETECT_TIMEOUT, child).await {
        Err(_) => return Err(AgentError::Detection("lpstat timed out".into())),
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Ok(Err(e)) => return Err(AgentError::Detection(format!("lpstat: {e}"))),
        Ok(Ok(output)) => output,
    };

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        // A CUPS install with no queues exits non-zero with this message.
        if stderr.contains("No destinations") {
            return Ok(Some(String::new()));
        }
        return Err(AgentError::Detection(format!(
            "lpstat exited with {}: {}",
            output.status,
            stderr.trim()
        )));
    }
    Ok(Some(stdout))
}

/// First token of every non-empty line is a queue name.
pub fn parse_lpstat(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_owned)
        .collect()
}

pub fn descriptor_for_cups_queue(name: String, lp_available: bool) -> PrinterDescriptor {
    let kind = if lp_available {
        PrinterKind::Command {
            cmd: vec!["lp".into(), "-d".into(), name.clone()],
        }
    } else {
        PrinterKind::Unsupported {
            reason: "CUPS queue found but the lp command is not installed".into(),
        }
    };
    PrinterDescriptor::new(name, kind, PrinterSource::Detected)
}

/// Whether an executable `lp` is reachable through `search_path`.
///
/// A file without the executable bit does not count.
pub fn lp_installed(search_path: Option<OsString>) -> bool {
    search_path.is_some_and(|paths| which::which_in("lp", Some(paths), ".").is_ok())
}

// ---------------------------------------------------------------------------
// Windows spooler
// ---------------------------------------------------------------------------

#[cfg(windows)]
mod win {
    use windows_sys::Win32::Graphics::Printing::{
        EnumPrintersW, PRINTER_ENUM_CONNECTIONS, PRINTER_ENUM_LOCAL, PRINTER_INFO_4W,
    };

    use printagent_core::error::{AgentError, Result};

    pub fn enum_printers() -> Result<Vec<String>> {
        let flags = PRINTER_ENUM_LOCAL | PRINTER_ENUM_CONNECTIONS;
        let mut needed = 0u32;
        let mut returned = 0u32;

        // First call sizes the buffer.
        // SAFETY: a null buffer with size 0 is the documented sizing call.
        unsafe {
            EnumPrintersW(
                flags,
                std::ptr::null(),
                4,
                std::ptr::null_mut(),
                0,
                &mut needed,
                &mut returned,
            );
        }
        if needed == 0 {
            return Ok(Vec::new());
        }

        // u64 backing keeps the PRINTER_INFO_4W array pointer-aligned.
        let mut buf = vec![0u64; (needed as usize).div_ceil(8)];
        // SAFETY: `buf` is at least `needed` bytes and outlives the call.
        let ok = unsafe {
            EnumPrintersW(
                flags,
                std::ptr::null(),
                4,
                buf.as_mut_ptr().cast(),
                needed,
                &mut needed,
                &mut returned,
            )
        };
        if ok == 0 {
            return Err(AgentError::Detection(format!(
                "EnumPrintersW: {}",
                std::io::Error::last_os_error()
            )));
        }

        // SAFETY: the spooler wrote `returned` PRINTER_INFO_4W records at the
        // start of `buf`; their strings point into the same buffer.
        let infos = unsafe {
            std::slice::from_raw_parts(buf.as_ptr().cast::<PRINTER_INFO_4W>(), returned as usize)
        };
        Ok(infos
            .iter()
            .filter(|info| !info.pPrinterName.is_null())
            .map(|info| unsafe { from_wide(info.pPrinterName) })
            .collect())
    }

    /// # Safety
    /// `ptr` must point to a NUL-terminated UTF-16 string.
    unsafe fn from_wide(ptr: *const u16) -> String {
        let mut len = 0;
        // SAFETY: guaranteed NUL-terminated by the caller.
        unsafe {
            while *ptr.add(len) != 0 {
                len += 1;
            }
            String::from_utf16_lossy(std::slice::from_raw_parts(ptr, len))
        }
    }
}

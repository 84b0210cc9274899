//! The HTTP send session: one `PUT` per file on a kept-alive connection.
//!
//! The lock-name discipline still applies: the object is `PUT` under the
//! lock name and moved with a `MOVE` request (WebDAV-style) on publish
//! when the two names differ.

use afd_core::exit::WorkerExit;
use afd_core::job::JobSpec;

use crate::error::TransferError;
use crate::session::{connect_stream, SendSession, SessionConfig, TextChannel};

/// One HTTP connection.
#[derive(Debug)]
pub struct HttpSession {
    host: String,
    port: u16,
    base_path: String,
    config: SessionConfig,
    control: Option<TextChannel>,
    body: Vec<u8>,
    open_name: Option<String>,
}

impl HttpSession {
    /// Prepares a session from the job spec.
    #[must_use]
    pub fn new(spec: &JobSpec, config: SessionConfig) -> Self {
        let mut base_path = spec.destination.path.clone();
        if !base_path.ends_with('/') {
            base_path.push('/');
        }
        Self {
            host: spec.destination.host.clone(),
            port: spec.destination.port,
            base_path,
            config,
            control: None,
            body: Vec::new(),
            open_name: None,
        }
    }

    fn object_path(&self, name: &str) -> String {
        format!("{}{name}", self.base_path)
    }

    fn request(
        &mut self,
        head: &str,
        body: &[u8],
        fail_code: WorkerExit,
    ) -> Result<u16, TransferError> {
        use std::io::Write;
        let control = self.control.as_mut().ok_or_else(|| {
            TransferError::new(WorkerExit::Connect, "connection not open")
        })?;
        let mut stream = control.stream();
        stream
            .write_all(head.as_bytes())
            .and_then(|()| stream.write_all(body))
            .map_err(|e| TransferError::io(fail_code, &e))?;

        let status_line = control
            .read_line()
            .map_err(|e| TransferError::io(fail_code, &e))?;
        let status = parse_status(&status_line).ok_or_else(|| {
            TransferError::new(fail_code, format!("unparsable status line: {status_line}"))
        })?;
        // Drain headers and any body we were told about.
        let mut content_length = 0usize;
        loop {
            let line = control
                .read_line()
                .map_err(|e| TransferError::io(fail_code, &e))?;
            if line.is_empty() {
                break;
            }
            if let Some(value) = line
                .to_ascii_lowercase()
                .strip_prefix("content-length:")
                .map(str::trim)
            {
                content_length = value.parse().unwrap_or(0);
            }
        }
        if content_length > 0 {
            let mut sink = vec![0u8; content_length];
            control
                .read_exact(&mut sink)
                .map_err(|e| TransferError::io(fail_code, &e))?;
        }
        Ok(status)
    }
}

impl SendSession for HttpSession {
    fn connect(&mut self) -> Result<(), TransferError> {
        let stream = connect_stream(&self.host, self.port, self.config.timeout)?;
        self.control =
            Some(TextChannel::new(stream).map_err(|e| TransferError::io(WorkerExit::Connect, &e))?);
        self.config.interrupt.check()
    }

    fn open(&mut self, lock_name: &str, size: u64) -> Result<(), TransferError> {
        self.body.clear();
        self.body.reserve(size as usize);
        self.open_name = Some(lock_name.to_owned());
        Ok(())
    }

    fn write_chunk(&mut self, data: &[u8]) -> Result<(), TransferError> {
        self.config.interrupt.check()?;
        self.body.extend_from_slice(data);
        Ok(())
    }

    fn close_file(&mut self) -> Result<(), TransferError> {
        let name = self.open_name.take().ok_or_else(|| {
            TransferError::new(WorkerExit::WriteRemote, "no object open")
        })?;
        let head = format!(
            "PUT {} HTTP/1.1\r\nHost: {}\r\nContent-Length: {}\r\nConnection: keep-alive\r\n\r\n",
            self.object_path(&name),
            self.host,
            self.body.len(),
        );
        let body = std::mem::take(&mut self.body);
        let status = self.request(&head, &body, WorkerExit::WriteRemote)?;
        if (200..300).contains(&status) {
            Ok(())
        } else {
            Err(TransferError::new(
                WorkerExit::WriteRemote,
                format!("PUT {name} answered {status}"),
            ))
        }
    }

    fn publish(&mut self, lock_name: &str, final_name: &str) -> Result<(), TransferError> {
        if lock_name == final_name {
            return Ok(());
        }
        let destination = format!(
            "http://{}:{}{}",
            self.host,
            self.port,
            self.object_path(final_name)
        );
        let head = format!(
            "MOVE {} HTTP/1.1\r\nHost: {}\r\nDestination: {}\r\nOverwrite: T\r\nContent-Length: 0\r\n\r\n",
            self.object_path(lock_name),
            self.host,
            destination,
        );
        let status = self.request(&head, &[], WorkerExit::MoveRemote)?;
        if (200..300).contains(&status) {
            Ok(())
        } else {
            Err(TransferError::new(
                WorkerExit::MoveRemote,
                format!("MOVE answered {status}"),
            ))
        }
    }

    fn disconnect(&mut self) -> Result<(), TransferError> {
        self.control.take();
        Ok(())
    }
}

fn parse_status(line: &str) -> Option<u16> {
    let mut parts = line.split_whitespace();
    let version = parts.next()?;
    if !version.starts_with("HTTP/") {
        return None;
    }
    parts.next()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_lines_parse() {
        assert_eq!(parse_status("HTTP/1.1 201 Created"), Some(201));
        assert_eq!(parse_status("HTTP/1.0 204 No Content"), Some(204));
        assert_eq!(parse_status("SMTP 250 nope"), None);
        assert_eq!(parse_status(""), None);
    }

    #[test]
    fn object_paths_join_cleanly() {
        let spec = spec_from("http://store.example/drop\n");
        let session =
            HttpSession::new(&spec, SessionConfig::new(std::time::Duration::from_secs(5)));
        assert_eq!(session.object_path("f.bin"), "/drop/f.bin");

        let spec = spec_from("http://store.example/drop/\n");
        let session =
            HttpSession::new(&spec, SessionConfig::new(std::time::Duration::from_secs(5)));
        assert_eq!(session.object_path("f.bin"), "/drop/f.bin");
    }

    fn spec_from(text: &str) -> JobSpec {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("msg");
        std::fs::write(&path, text).expect("writes");
        JobSpec::evaluate(&path, afd_core::ids::JobId(1)).expect("evaluates")
    }
}

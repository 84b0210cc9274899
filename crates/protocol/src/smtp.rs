//! The SMTP send session.
//!
//! Every file becomes one mail message: envelope from the job's mail
//! settings, the file content as the body with dot-stuffing applied.
//! Publishing is a no-op; mail has no rename.

use afd_core::exit::WorkerExit;
use afd_core::job::JobSpec;

use crate::error::TransferError;
use crate::session::{connect_stream, SendSession, SessionConfig, TextChannel};

/// Default sender when the job carries no `from` option.
const DEFAULT_SENDER: &str = "afd";

/// One SMTP connection.
#[derive(Debug)]
pub struct SmtpSession {
    server: String,
    port: u16,
    recipient: String,
    from: String,
    subject: Option<String>,
    config: SessionConfig,
    control: Option<TextChannel>,
    in_data: bool,
    at_line_start: bool,
}

impl SmtpSession {
    /// Prepares a session from the job spec.
    #[must_use]
    pub fn new(spec: &JobSpec, config: SessionConfig) -> Self {
        // An explicit relay server wins over the URL host.
        let (server, port) = spec
            .mail_server
            .as_deref()
            .map_or((spec.destination.host.clone(), spec.destination.port), |s| {
                match s.split_once(':') {
                    Some((h, p)) => (h.to_owned(), p.parse().unwrap_or(25)),
                    None => (s.to_owned(), 25),
                }
            });
        let recipient = if spec.destination.path.is_empty() {
            spec.destination.user.clone()
        } else {
            spec.destination.path.clone()
        };
        Self {
            server,
            port,
            recipient,
            from: spec
                .mail_from
                .clone()
                .unwrap_or_else(|| DEFAULT_SENDER.to_owned()),
            subject: spec.mail_subject.clone(),
            config,
            control: None,
            in_data: false,
            at_line_start: true,
        }
    }

    fn command(
        &mut self,
        line: &str,
        expect: u16,
        fail_code: WorkerExit,
    ) -> Result<(), TransferError> {
        let control = self.control.as_mut().ok_or_else(|| {
            TransferError::new(WorkerExit::Connect, "control channel not connected")
        })?;
        control
            .send_line(line)
            .map_err(|e| TransferError::io(fail_code, &e))?;
        let (code, text) = control
            .read_reply()
            .map_err(|e| TransferError::io(fail_code, &e))?;
        if code == expect {
            Ok(())
        } else {
            let verb = line.split_whitespace().next().unwrap_or(line);
            Err(TransferError::new(
                fail_code,
                format!("{verb} rejected: {text}"),
            ))
        }
    }

    fn raw_write(&mut self, data: &[u8]) -> Result<(), TransferError> {
        use std::io::Write;
        let control = self.control.as_mut().ok_or_else(|| {
            TransferError::new(WorkerExit::WriteRemote, "control channel not connected")
        })?;
        let mut stream = control.stream();
        stream
            .write_all(data)
            .map_err(|e| TransferError::io(WorkerExit::WriteRemote, &e))
    }
}

impl SendSession for SmtpSession {
    fn connect(&mut self) -> Result<(), TransferError> {
        let stream = connect_stream(&self.server, self.port, self.config.timeout)?;
        let mut control =
            TextChannel::new(stream).map_err(|e| TransferError::io(WorkerExit::Connect, &e))?;
        let (code, text) = control
            .read_reply()
            .map_err(|e| TransferError::io(WorkerExit::Connect, &e))?;
        if code != 220 {
            return Err(TransferError::new(
                WorkerExit::Connect,
                format!("unexpected greeting: {text}"),
            ));
        }
        self.control = Some(control);
        let helo = format!("HELO {}", local_hostname());
        self.command(&helo, 250, WorkerExit::Connect)?;
        self.config.interrupt.check()
    }

    fn open(&mut self, lock_name: &str, _size: u64) -> Result<(), TransferError> {
        let mail_from = format!("MAIL FROM:<{}>", self.from);
        self.command(&mail_from, 250, WorkerExit::RemoteUser)?;
        let rcpt = format!("RCPT TO:<{}>", self.recipient);
        self.command(&rcpt, 250, WorkerExit::Mail)?;
        let control = self.control.as_mut().ok_or_else(|| {
            TransferError::new(WorkerExit::Connect, "control channel not connected")
        })?;
        control
            .send_line("DATA")
            .map_err(|e| TransferError::io(WorkerExit::Data, &e))?;
        let (code, text) = control
            .read_reply()
            .map_err(|e| TransferError::io(WorkerExit::Data, &e))?;
        if code != 354 {
            return Err(TransferError::new(
                WorkerExit::Data,
                format!("DATA rejected: {text}"),
            ));
        }
        self.in_data = true;
        self.at_line_start = true;

        let subject = self
            .subject
            .clone()
            .unwrap_or_else(|| lock_name.to_owned());
        let headers = format!(
            "From: {}\r\nTo: {}\r\nSubject: {}\r\n\r\n",
            self.from, self.recipient, subject
        );
        self.raw_write(headers.as_bytes())
    }

    fn write_chunk(&mut self, data: &[u8]) -> Result<(), TransferError> {
        self.config.interrupt.check()?;
        let stuffed = dot_stuff(data, self.at_line_start);
        if let Some(&last) = data.last() {
            self.at_line_start = last == b'\n';
        }
        self.raw_write(&stuffed)
    }

    fn close_file(&mut self) -> Result<(), TransferError> {
        if !self.in_data {
            return Ok(());
        }
        let terminator: &[u8] = if self.at_line_start {
            b".\r\n"
        } else {
            b"\r\n.\r\n"
        };
        self.raw_write(terminator)?;
        self.in_data = false;
        let control = self.control.as_mut().ok_or_else(|| {
            TransferError::new(WorkerExit::CloseRemote, "control channel not connected")
        })?;
        let (code, text) = control
            .read_reply()
            .map_err(|e| TransferError::io(WorkerExit::CloseRemote, &e))?;
        if code == 250 {
            Ok(())
        } else {
            Err(TransferError::new(
                WorkerExit::Mail,
                format!("message not accepted: {text}"),
            ))
        }
    }

    fn publish(&mut self, _lock_name: &str, _final_name: &str) -> Result<(), TransferError> {
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), TransferError> {
        if self.control.is_some() {
            self.command("QUIT", 221, WorkerExit::Quit)?;
            self.control.take();
        }
        Ok(())
    }
}

/// Duplicates leading dots per RFC 5321 so a body line `.x` survives.
fn dot_stuff(data: &[u8], mut at_line_start: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    for &b in data {
        if at_line_start && b == b'.' {
            out.push(b'.');
        }
        out.push(b);
        at_line_start = b == b'\n';
    }
    out
}

fn local_hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_owned())
}

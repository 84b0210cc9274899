//! The FTP send session.
//!
//! Control connection with numeric replies, data connections via PASV or
//! EPSV depending on the host's protocol options, `STOR` under the lock
//! name and `RNFR`/`RNTO` on publish.

use std::io::Write;
use std::net::TcpStream;

use afd_core::exit::WorkerExit;
use afd_core::job::JobSpec;
use fsa::host::protocol_options;

use crate::error::TransferError;
use crate::session::{connect_stream, SendSession, SessionConfig, TextChannel};

/// One FTP connection.
#[derive(Debug)]
pub struct FtpSession {
    host: String,
    port: u16,
    user: String,
    password: String,
    path: String,
    create_target_dir: bool,
    config: SessionConfig,
    control: Option<TextChannel>,
    data: Option<TcpStream>,
}

impl FtpSession {
    /// Prepares a session from the job spec; nothing connects yet.
    #[must_use]
    pub fn new(spec: &JobSpec, config: SessionConfig) -> Self {
        Self {
            host: spec.destination.host.clone(),
            port: spec.destination.port,
            user: if spec.destination.user.is_empty() {
                "anonymous".to_owned()
            } else {
                spec.destination.user.clone()
            },
            password: spec.destination.password.clone().unwrap_or_default(),
            path: spec.destination.path.clone(),
            create_target_dir: spec.create_target_dir,
            config,
            control: None,
            data: None,
        }
    }

    fn control(&mut self) -> Result<&mut TextChannel, TransferError> {
        self.control.as_mut().ok_or_else(|| {
            TransferError::new(WorkerExit::Connect, "control channel not connected")
        })
    }

    /// Sends a command and expects a reply class.
    fn command(
        &mut self,
        line: &str,
        expect: &[u16],
        fail_code: WorkerExit,
    ) -> Result<(u16, String), TransferError> {
        let control = self.control()?;
        control
            .send_line(line)
            .map_err(|e| TransferError::io(fail_code, &e))?;
        let (code, text) = control
            .read_reply()
            .map_err(|e| TransferError::io(fail_code, &e))?;
        if expect.contains(&code) {
            Ok((code, text))
        } else {
            let verb = line.split_whitespace().next().unwrap_or(line);
            Err(TransferError::new(
                fail_code,
                format!("{verb} rejected: {text}"),
            ))
        }
    }

    fn open_data(&mut self) -> Result<TcpStream, TransferError> {
        let extended = self.config.protocol_options & protocol_options::FTP_EXTENDED != 0;
        let timeout = self.config.timeout;
        if extended {
            let (_, text) = self.command("EPSV", &[229], WorkerExit::Data)?;
            let port = parse_epsv(&text).ok_or_else(|| {
                TransferError::new(WorkerExit::Data, format!("unparsable EPSV reply: {text}"))
            })?;
            let host = self.host.clone();
            connect_stream(&host, port, timeout)
        } else {
            let (_, text) = self.command("PASV", &[227], WorkerExit::Data)?;
            let (host, port) = parse_pasv(&text).ok_or_else(|| {
                TransferError::new(WorkerExit::Data, format!("unparsable PASV reply: {text}"))
            })?;
            connect_stream(&host, port, timeout)
        }
    }
}

impl SendSession for FtpSession {
    fn connect(&mut self) -> Result<(), TransferError> {
        let stream = connect_stream(&self.host, self.port, self.config.timeout)?;
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

        let user = format!("USER {}", self.user);
        let (code, _) = self.command(&user, &[230, 331], WorkerExit::User)?;
        if code == 331 {
            let pass = format!("PASS {}", self.password);
            self.command(&pass, &[230], WorkerExit::Password)?;
        }

        if self.config.protocol_options & protocol_options::FTP_IGNORE_BIN == 0 {
            self.command("TYPE I", &[200], WorkerExit::TypeSet)?;
        }

        if !self.path.is_empty() && self.path != "/" {
            let cwd = format!("CWD {}", self.path);
            let path = self.path.clone();
            if self.command(&cwd, &[250], WorkerExit::Chdir).is_err() {
                if !self.create_target_dir {
                    return Err(TransferError::new(
                        WorkerExit::Chdir,
                        format!("cannot change to {path}"),
                    ));
                }
                self.command(&format!("MKD {path}"), &[257], WorkerExit::Mkdir)?;
                self.command(&cwd, &[250], WorkerExit::Chdir)?;
            }
        }
        self.config.interrupt.check()
    }

    fn open(&mut self, lock_name: &str, _size: u64) -> Result<(), TransferError> {
        let data = self.open_data()?;
        let control = self.control()?;
        control
            .send_line(&format!("STOR {lock_name}"))
            .map_err(|e| TransferError::io(WorkerExit::OpenRemote, &e))?;
        let (code, text) = control
            .read_reply()
            .map_err(|e| TransferError::io(WorkerExit::OpenRemote, &e))?;
        if code != 150 && code != 125 {
            return Err(TransferError::new(
                WorkerExit::OpenRemote,
                format!("STOR rejected: {text}"),
            ));
        }
        self.data = Some(data);
        Ok(())
    }

    fn write_chunk(&mut self, data: &[u8]) -> Result<(), TransferError> {
        self.config.interrupt.check()?;
        let stream = self.data.as_mut().ok_or_else(|| {
            TransferError::new(WorkerExit::WriteRemote, "no data connection open")
        })?;
        stream
            .write_all(data)
            .map_err(|e| TransferError::io(WorkerExit::WriteRemote, &e))
    }

    fn close_file(&mut self) -> Result<(), TransferError> {
        // Closing the data connection signals end-of-file to the server.
        self.data.take();
        let control = self.control()?;
        let (code, text) = control
            .read_reply()
            .map_err(|e| TransferError::io(WorkerExit::CloseRemote, &e))?;
        if code == 226 || code == 250 {
            Ok(())
        } else {
            Err(TransferError::new(
                WorkerExit::CloseRemote,
                format!("transfer not acknowledged: {text}"),
            ))
        }
    }

    fn publish(&mut self, lock_name: &str, final_name: &str) -> Result<(), TransferError> {
        if lock_name == final_name {
            return Ok(());
        }
        self.command(&format!("RNFR {lock_name}"), &[350], WorkerExit::MoveRemote)?;
        self.command(&format!("RNTO {final_name}"), &[250], WorkerExit::MoveRemote)?;
        Ok(())
    }

    fn chmod_chown(
        &mut self,
        final_name: &str,
        mode: Option<u32>,
        _owner: Option<&str>,
    ) -> Result<(), TransferError> {
        if let Some(mode) = mode {
            // Best effort: plenty of servers refuse SITE CHMOD.
            let _ = self.command(
                &format!("SITE CHMOD {mode:o} {final_name}"),
                &[200, 250],
                WorkerExit::Chown,
            );
        }
        Ok(())
    }

    fn create_dir_lock(&mut self) -> Result<(), TransferError> {
        self.open("LOCKFILE", 0)?;
        self.close_file()
    }

    fn remove_dir_lock(&mut self) -> Result<(), TransferError> {
        self.command("DELE LOCKFILE", &[250], WorkerExit::RemoveLockfile)?;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), TransferError> {
        self.data.take();
        if self.control.is_some() {
            self.command("QUIT", &[221], WorkerExit::Quit)?;
            self.control.take();
        }
        Ok(())
    }
}

/// Parses a `227 Entering Passive Mode (h1,h2,h3,h4,p1,p2)` reply.
pub(crate) fn parse_pasv(text: &str) -> Option<(String, u16)> {
    let open = text.find('(')?;
    let close = text[open..].find(')')? + open;
    let parts: Vec<&str> = text[open + 1..close].split(',').collect();
    let [h1, h2, h3, h4, p1, p2] = parts[..] else {
        return None;
    };
    let host = format!("{h1}.{h2}.{h3}.{h4}");
    let p1: u16 = p1.trim().parse().ok()?;
    let p2: u16 = p2.trim().parse().ok()?;
    Some((host, p1 * 256 + p2))
}

/// Parses a `229 Entering Extended Passive Mode (|||port|)` reply.
pub(crate) fn parse_epsv(text: &str) -> Option<u16> {
    let open = text.find('(')?;
    let close = text[open..].find(')')? + open;
    let inner = &text[open + 1..close];
    inner.trim_matches('|').parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pasv_reply_parses() {
        let (host, port) =
            parse_pasv("227 Entering Passive Mode (192,168,1,9,197,143)").expect("parses");
        assert_eq!(host, "192.168.1.9");
        assert_eq!(port, 197 * 256 + 143);
    }

    #[test]
    fn pasv_garbage_is_rejected() {
        assert_eq!(parse_pasv("227 whatever"), None);
        assert_eq!(parse_pasv("227 (1,2,3)"), None);
        assert_eq!(parse_pasv("227 (a,b,c,d,e,f)"), None);
    }

    #[test]
    fn epsv_reply_parses() {
        assert_eq!(parse_epsv("229 Entering Extended Passive Mode (|||50143|)"), Some(50143));
        assert_eq!(parse_epsv("229 nope"), None);
    }

    #[test]
    fn anonymous_user_is_the_default() {
        let spec = test_spec("ftp://host.example/in");
        let session = FtpSession::new(&spec, SessionConfig::new(std::time::Duration::from_secs(5)));
        assert_eq!(session.user, "anonymous");
    }

    fn test_spec(url: &str) -> JobSpec {
        let text = format!("{url}\n");
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("msg");
        std::fs::write(&path, text).expect("writes");
        JobSpec::evaluate(&path, afd_core::ids::JobId(1)).expect("evaluates")
    }
}

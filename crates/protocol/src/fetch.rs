//! Retrieve sessions: the gf-side mirror of sending.
//!
//! List the remote directory, let the caller filter, stream each file into
//! the incoming spool, optionally delete the remote original. FTP, SFTP,
//! LOC and HTTP sources are supported; HTTP has no listing, so the
//! configured path itself is the one file offered.

use std::fs;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::PathBuf;

use afd_core::exit::WorkerExit;
use afd_core::job::{Destination, ProtocolKind};

use crate::error::TransferError;
use crate::ftp::{parse_epsv, parse_pasv};
use crate::session::{connect_stream, SessionConfig, TextChannel};
use crate::sftp::open_ssh_for_fetch;

/// One remote directory entry offered for retrieval.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteFile {
    /// Name relative to the source directory.
    pub name: String,
    /// Size when the listing provides one.
    pub size: Option<u64>,
}

/// One protocol-specific retrieve connection.
pub trait FetchSession {
    /// Connects and authenticates.
    fn connect(&mut self) -> Result<(), TransferError>;

    /// Lists the files currently offered.
    fn list(&mut self) -> Result<Vec<RemoteFile>, TransferError>;

    /// Streams one file into `out`, returning the byte count.
    fn retrieve(&mut self, name: &str, out: &mut dyn Write) -> Result<u64, TransferError>;

    /// Deletes the remote original after a successful fetch.
    fn delete(&mut self, name: &str) -> Result<(), TransferError>;

    /// Disconnects in an orderly way.
    fn disconnect(&mut self) -> Result<(), TransferError>;
}

/// Builds the fetch session matching the source URL's protocol.
pub fn open_fetch_session(
    source: &Destination,
    config: SessionConfig,
) -> Result<Box<dyn FetchSession>, TransferError> {
    Ok(match source.protocol {
        ProtocolKind::Ftp => Box::new(FtpFetch::new(source, config)),
        ProtocolKind::Sftp => Box::new(SftpFetch::new(source, config)),
        ProtocolKind::Loc => Box::new(LocFetch::new(source)),
        ProtocolKind::Http => Box::new(HttpFetch::new(source, config)),
        other => {
            return Err(TransferError::new(
                WorkerExit::Syntax,
                format!("retrieval over {} is not supported", other.name()),
            ));
        }
    })
}

// --- FTP -----------------------------------------------------------------

/// FTP retrieval via NLST and RETR.
pub struct FtpFetch {
    source: Destination,
    config: SessionConfig,
    control: Option<TextChannel>,
}

impl FtpFetch {
    /// Prepares a session; nothing connects yet.
    #[must_use]
    pub fn new(source: &Destination, config: SessionConfig) -> Self {
        Self {
            source: source.clone(),
            config,
            control: None,
        }
    }

    fn command(
        &mut self,
        line: &str,
        expect: &[u16],
        fail: WorkerExit,
    ) -> Result<(u16, String), TransferError> {
        let control = self
            .control
            .as_mut()
            .ok_or_else(|| TransferError::new(WorkerExit::Connect, "not connected"))?;
        control
            .send_line(line)
            .map_err(|e| TransferError::io(fail, &e))?;
        let (code, text) = control
            .read_reply()
            .map_err(|e| TransferError::io(fail, &e))?;
        if expect.contains(&code) {
            Ok((code, text))
        } else {
            Err(TransferError::new(fail, format!("{line} rejected: {text}")))
        }
    }

    fn open_data(&mut self) -> Result<TcpStream, TransferError> {
        let timeout = self.config.timeout;
        match self.command("EPSV", &[229], WorkerExit::Data) {
            Ok((_, text)) => {
                let port = parse_epsv(&text).ok_or_else(|| {
                    TransferError::new(WorkerExit::Data, format!("unparsable EPSV reply: {text}"))
                })?;
                let host = self.source.host.clone();
                connect_stream(&host, port, timeout)
            }
            Err(_) => {
                let (_, text) = self.command("PASV", &[227], WorkerExit::Data)?;
                let (host, port) = parse_pasv(&text).ok_or_else(|| {
                    TransferError::new(WorkerExit::Data, format!("unparsable PASV reply: {text}"))
                })?;
                connect_stream(&host, port, timeout)
            }
        }
    }

    fn finish_data(&mut self, fail: WorkerExit) -> Result<(), TransferError> {
        let control = self
            .control
            .as_mut()
            .ok_or_else(|| TransferError::new(WorkerExit::Connect, "not connected"))?;
        let (code, text) = control
            .read_reply()
            .map_err(|e| TransferError::io(fail, &e))?;
        if code == 226 || code == 250 {
            Ok(())
        } else {
            Err(TransferError::new(fail, format!("transfer failed: {text}")))
        }
    }
}

impl FetchSession for FtpFetch {
    fn connect(&mut self) -> Result<(), TransferError> {
        let stream = connect_stream(&self.source.host, self.source.port, self.config.timeout)?;
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

        let user = if self.source.user.is_empty() {
            "anonymous".to_owned()
        } else {
            self.source.user.clone()
        };
        let (code, _) = self.command(&format!("USER {user}"), &[230, 331], WorkerExit::User)?;
        if code == 331 {
            let pass = self.source.password.clone().unwrap_or_default();
            self.command(&format!("PASS {pass}"), &[230], WorkerExit::Password)?;
        }
        self.command("TYPE I", &[200], WorkerExit::TypeSet)?;
        if !self.source.path.is_empty() && self.source.path != "/" {
            let cwd = format!("CWD {}", self.source.path);
            self.command(&cwd, &[250], WorkerExit::Chdir)?;
        }
        self.config.interrupt.check()
    }

    fn list(&mut self) -> Result<Vec<RemoteFile>, TransferError> {
        let mut data = self.open_data()?;
        self.command("NLST", &[150, 125], WorkerExit::List)?;
        let mut listing = String::new();
        data.read_to_string(&mut listing)
            .map_err(|e| TransferError::io(WorkerExit::List, &e))?;
        drop(data);
        self.finish_data(WorkerExit::List)?;
        Ok(listing
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(|l| RemoteFile {
                name: l.to_owned(),
                size: None,
            })
            .collect())
    }

    fn retrieve(&mut self, name: &str, out: &mut dyn Write) -> Result<u64, TransferError> {
        let mut data = self.open_data()?;
        self.command(&format!("RETR {name}"), &[150, 125], WorkerExit::OpenRemote)?;
        let mut buf = [0u8; 16 * 1024];
        let mut total = 0u64;
        loop {
            self.config.interrupt.check()?;
            let n = data
                .read(&mut buf)
                .map_err(|e| TransferError::io(WorkerExit::ReadRemote, &e))?;
            if n == 0 {
                break;
            }
            out.write_all(&buf[..n])
                .map_err(|e| TransferError::io(WorkerExit::WriteLocal, &e))?;
            total += n as u64;
        }
        drop(data);
        self.finish_data(WorkerExit::ReadRemote)?;
        Ok(total)
    }

    fn delete(&mut self, name: &str) -> Result<(), TransferError> {
        self.command(&format!("DELE {name}"), &[250], WorkerExit::MoveRemote)?;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), TransferError> {
        if self.control.is_some() {
            self.command("QUIT", &[221], WorkerExit::Quit)?;
            self.control.take();
        }
        Ok(())
    }
}

// --- SFTP ----------------------------------------------------------------

/// SFTP retrieval via readdir and streamed reads.
pub struct SftpFetch {
    source: Destination,
    config: SessionConfig,
    session: Option<ssh2::Session>,
    sftp: Option<ssh2::Sftp>,
}

impl SftpFetch {
    /// Prepares a session; nothing connects yet.
    #[must_use]
    pub fn new(source: &Destination, config: SessionConfig) -> Self {
        Self {
            source: source.clone(),
            config,
            session: None,
            sftp: None,
        }
    }

    fn sftp(&self) -> Result<&ssh2::Sftp, TransferError> {
        self.sftp
            .as_ref()
            .ok_or_else(|| TransferError::new(WorkerExit::Connect, "sftp channel not open"))
    }

    fn dir(&self) -> PathBuf {
        PathBuf::from(&self.source.path)
    }
}

impl FetchSession for SftpFetch {
    fn connect(&mut self) -> Result<(), TransferError> {
        let session = open_ssh_for_fetch(&self.source, &self.config)?;
        let sftp = session.sftp().map_err(|e| {
            TransferError::new(WorkerExit::Connect, e.message().to_owned())
        })?;
        self.session = Some(session);
        self.sftp = Some(sftp);
        self.config.interrupt.check()
    }

    fn list(&mut self) -> Result<Vec<RemoteFile>, TransferError> {
        let entries = self
            .sftp()?
            .readdir(&self.dir())
            .map_err(|e| TransferError::new(WorkerExit::List, e.message().to_owned()))?;
        Ok(entries
            .into_iter()
            .filter(|(_, stat)| stat.is_file())
            .filter_map(|(path, stat)| {
                path.file_name().map(|n| RemoteFile {
                    name: n.to_string_lossy().into_owned(),
                    size: stat.size,
                })
            })
            .collect())
    }

    fn retrieve(&mut self, name: &str, out: &mut dyn Write) -> Result<u64, TransferError> {
        let path = self.dir().join(name);
        let mut remote = self
            .sftp()?
            .open(&path)
            .map_err(|e| TransferError::new(WorkerExit::OpenRemote, e.message().to_owned()))?;
        let mut buf = [0u8; 16 * 1024];
        let mut total = 0u64;
        loop {
            self.config.interrupt.check()?;
            let n = remote
                .read(&mut buf)
                .map_err(|e| TransferError::io(WorkerExit::ReadRemote, &e))?;
            if n == 0 {
                break;
            }
            out.write_all(&buf[..n])
                .map_err(|e| TransferError::io(WorkerExit::WriteLocal, &e))?;
            total += n as u64;
        }
        Ok(total)
    }

    fn delete(&mut self, name: &str) -> Result<(), TransferError> {
        let path = self.dir().join(name);
        self.sftp()?
            .unlink(&path)
            .map_err(|e| TransferError::new(WorkerExit::MoveRemote, e.message().to_owned()))
    }

    fn disconnect(&mut self) -> Result<(), TransferError> {
        self.sftp.take();
        if let Some(session) = self.session.take() {
            session
                .disconnect(None, "done", None)
                .map_err(|e| TransferError::new(WorkerExit::Quit, e.message().to_owned()))?;
        }
        Ok(())
    }
}

// --- LOC -----------------------------------------------------------------

/// Local-directory retrieval.
#[derive(Debug)]
pub struct LocFetch {
    dir: PathBuf,
}

impl LocFetch {
    /// Prepares a session over the local source directory.
    #[must_use]
    pub fn new(source: &Destination) -> Self {
        Self {
            dir: PathBuf::from(&source.path),
        }
    }
}

impl FetchSession for LocFetch {
    fn connect(&mut self) -> Result<(), TransferError> {
        if self.dir.is_dir() {
            Ok(())
        } else {
            Err(TransferError::new(
                WorkerExit::StatTarget,
                format!("{} is not a directory", self.dir.display()),
            ))
        }
    }

    fn list(&mut self) -> Result<Vec<RemoteFile>, TransferError> {
        let entries = fs::read_dir(&self.dir)
            .map_err(|e| TransferError::io(WorkerExit::List, &e))?;
        let mut out = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| TransferError::io(WorkerExit::List, &e))?;
            let meta = entry
                .metadata()
                .map_err(|e| TransferError::io(WorkerExit::Stat, &e))?;
            if meta.is_file() {
                out.push(RemoteFile {
                    name: entry.file_name().to_string_lossy().into_owned(),
                    size: Some(meta.len()),
                });
            }
        }
        Ok(out)
    }

    fn retrieve(&mut self, name: &str, out: &mut dyn Write) -> Result<u64, TransferError> {
        let mut file = fs::File::open(self.dir.join(name))
            .map_err(|e| TransferError::io(WorkerExit::OpenRemote, &e))?;
        std::io::copy(&mut file, out).map_err(|e| TransferError::io(WorkerExit::ReadLocal, &e))
    }

    fn delete(&mut self, name: &str) -> Result<(), TransferError> {
        fs::remove_file(self.dir.join(name))
            .map_err(|e| TransferError::io(WorkerExit::MoveRemote, &e))
    }

    fn disconnect(&mut self) -> Result<(), TransferError> {
        Ok(())
    }
}

// --- HTTP ----------------------------------------------------------------

/// Single-object HTTP retrieval via GET.
pub struct HttpFetch {
    source: Destination,
    config: SessionConfig,
    control: Option<TextChannel>,
}

impl HttpFetch {
    /// Prepares a session; nothing connects yet.
    #[must_use]
    pub fn new(source: &Destination, config: SessionConfig) -> Self {
        Self {
            source: source.clone(),
            config,
            control: None,
        }
    }
}

impl FetchSession for HttpFetch {
    fn connect(&mut self) -> Result<(), TransferError> {
        let stream = connect_stream(&self.source.host, self.source.port, self.config.timeout)?;
        self.control =
            Some(TextChannel::new(stream).map_err(|e| TransferError::io(WorkerExit::Connect, &e))?);
        Ok(())
    }

    fn list(&mut self) -> Result<Vec<RemoteFile>, TransferError> {
        // No listing over plain HTTP: the configured object is the offer.
        let name = self
            .source
            .path
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_owned();
        if name.is_empty() {
            return Err(TransferError::new(
                WorkerExit::List,
                "http source URL names no object",
            ));
        }
        Ok(vec![RemoteFile { name, size: None }])
    }

    fn retrieve(&mut self, _name: &str, out: &mut dyn Write) -> Result<u64, TransferError> {
        let control = self
            .control
            .as_mut()
            .ok_or_else(|| TransferError::new(WorkerExit::Connect, "not connected"))?;
        let head = format!(
            "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
            self.source.path, self.source.host,
        );
        let mut stream = control.stream();
        stream
            .write_all(head.as_bytes())
            .map_err(|e| TransferError::io(WorkerExit::OpenRemote, &e))?;

        let status_line = control
            .read_line()
            .map_err(|e| TransferError::io(WorkerExit::OpenRemote, &e))?;
        let ok = status_line
            .split_whitespace()
            .nth(1)
            .and_then(|s| s.parse::<u16>().ok())
            .is_some_and(|code| (200..300).contains(&code));
        if !ok {
            return Err(TransferError::new(
                WorkerExit::OpenRemote,
                format!("GET answered {status_line}"),
            ));
        }
        let mut content_length: Option<u64> = None;
        loop {
            let line = control
                .read_line()
                .map_err(|e| TransferError::io(WorkerExit::ReadRemote, &e))?;
            if line.is_empty() {
                break;
            }
            if let Some(value) = line
                .to_ascii_lowercase()
                .strip_prefix("content-length:")
                .map(str::trim)
            {
                content_length = value.parse().ok();
            }
        }
        const CHUNK: usize = 16 * 1024;
        let mut total = 0u64;
        loop {
            self.config.interrupt.check()?;
            if let Some(len) = content_length
                && total >= len
            {
                break;
            }
            let want = content_length.map_or(CHUNK, |len| CHUNK.min((len - total) as usize));
            let mut chunk = vec![0u8; want];
            match control.read_exact(&mut chunk) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof
                    && content_length.is_none() =>
                {
                    break;
                }
                Err(e) => return Err(TransferError::io(WorkerExit::ReadRemote, &e)),
            }
            out.write_all(&chunk)
                .map_err(|e| TransferError::io(WorkerExit::WriteLocal, &e))?;
            total += chunk.len() as u64;
        }
        Ok(total)
    }

    fn delete(&mut self, _name: &str) -> Result<(), TransferError> {
        // Deleting the remote object is not offered over plain HTTP.
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), TransferError> {
        self.control.take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc_source(dir: &std::path::Path) -> Destination {
        Destination::parse(&format!("file://localhost{}", dir.display())).expect("parses")
    }

    #[test]
    fn loc_fetch_lists_only_files() {
        let tmp = tempfile::tempdir().expect("tempdir");
        fs::write(tmp.path().join("a.txt"), b"aaa").expect("writes");
        fs::write(tmp.path().join("b.txt"), b"bb").expect("writes");
        fs::create_dir(tmp.path().join("subdir")).expect("mkdir");

        let mut fetch = LocFetch::new(&loc_source(tmp.path()));
        fetch.connect().expect("connects");
        let mut files = fetch.list().expect("lists");
        files.sort_by(|a, b| a.name.cmp(&b.name));
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].name, "a.txt");
        assert_eq!(files[0].size, Some(3));
    }

    #[test]
    fn loc_fetch_retrieves_and_deletes() {
        let tmp = tempfile::tempdir().expect("tempdir");
        fs::write(tmp.path().join("payload"), b"content").expect("writes");

        let mut fetch = LocFetch::new(&loc_source(tmp.path()));
        fetch.connect().expect("connects");
        let mut out = Vec::new();
        let n = fetch.retrieve("payload", &mut out).expect("retrieves");
        assert_eq!(n, 7);
        assert_eq!(out, b"content");

        fetch.delete("payload").expect("deletes");
        assert!(!tmp.path().join("payload").exists());
    }

    #[test]
    fn loc_fetch_rejects_missing_dir() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let missing = tmp.path().join("absent");
        let mut fetch = LocFetch::new(&loc_source(&missing));
        let err = fetch.connect().unwrap_err();
        assert_eq!(err.exit_code(), WorkerExit::StatTarget);
    }

    #[test]
    fn http_fetch_offers_the_configured_object() {
        let source = Destination::parse("http://server.example/data/obs.grib").expect("parses");
        let mut fetch = HttpFetch::new(&source, SessionConfig::new(std::time::Duration::from_secs(1)));
        let files = fetch.list().expect("lists");
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "obs.grib");
    }

    #[test]
    fn unsupported_fetch_protocols_are_rejected() {
        let source = Destination::parse("wmo://gts.example/").expect("parses");
        let err = open_fetch_session(&source, SessionConfig::new(std::time::Duration::from_secs(1)))
            .err()
            .expect("rejected");
        assert_eq!(err.exit_code(), WorkerExit::Syntax);
    }
}

//! SSH and SFTP access to the repository host.
//!
//! The transfer stages ([`copy`](crate::copy), [`import`](crate::import), [`doi`](crate::doi))
//! talk to the host through the [`Remote`] trait. [`RemoteHost`] implements it on top of a
//! blocking `ssh2` session authenticated with the configured private key. The server's host key
//! is checked against the configured known hosts file first: a changed key always aborts the
//! connection, an unknown host only with `strict_host_key_checking`.

use std::{
  fs::File,
  io::{ErrorKind, Read},
  net::TcpStream,
  time::Duration,
};

use ssh2::{CheckResult, KnownHostFileKind, KnownHosts, Session, Sftp};

use super::*;
use crate::config::Scp;

/// File transfer and command execution on the repository host.
pub trait Remote {
  /// Uploads `local` to the remote path `target`, returning the bytes sent.
  fn put(&mut self, local: &Path, target: &str) -> Result<u64, SafError>;

  /// Downloads the remote path `source` to `local`, returning the bytes received.
  fn get(&mut self, source: &str, local: &Path) -> Result<u64, SafError>;

  /// Names of the entries of a remote directory.
  fn list_dir(&mut self, dir: &str) -> Result<Vec<String>, SafError>;

  /// Deletes a remote file.
  fn remove(&mut self, path: &str) -> Result<(), SafError>;

  /// Runs a shell command and returns its output lines.
  ///
  /// The first line of standard error, if any, comes first and is prefixed with `ERROR: `.
  fn exec(&mut self, command: &str) -> Result<Vec<String>, SafError>;
}

/// An authenticated SSH session.
pub struct RemoteHost {
  /// Host name, for log lines
  server:  String,
  /// Underlying session
  session: Session,
}

impl RemoteHost {
  /// Opens a session to the `[scp]` host using public key authentication.
  ///
  /// Failures are logged and reported under `error ssh:<server>` before being returned.
  pub fn connect(scp: &Scp, report: &mut Report) -> Result<Self, SafError> {
    info!("connect ssh {}", scp.server);
    Self::open(scp).inspect_err(|e| {
      error!("{e}");
      info!("is sshd running on {}?", scp.server);
      report.add(format!("error ssh:{}", scp.server), e);
    })
  }

  /// TCP connect, handshake and authentication.
  fn open(scp: &Scp) -> Result<Self, SafError> {
    let tcp = TcpStream::connect((scp.server.as_str(), scp.port))?;
    let mut session = Session::new()?;
    session.set_tcp_stream(tcp);
    session.handshake()?;

    let (key, _) =
      session.host_key().ok_or_else(|| SafError::Remote(format!("{} sent no host key", scp.server)))?;
    let mut known_hosts = session.known_hosts()?;
    let path = scp.known_hosts_path();
    if path.is_file() {
      known_hosts.read_file(&path, KnownHostFileKind::OpenSSH)?;
    } else {
      warn!("known hosts file {} not found", path.display());
    }
    verify_host_key(&known_hosts, scp, key)?;

    session.userauth_pubkey_file(&scp.user, None, &scp.key_path(), None)?;
    if !session.authenticated() {
      return Err(SafError::Remote(format!("authentication as {} failed", scp.user)));
    }
    Ok(Self { server: scp.server.clone(), session })
  }

  /// A fresh SFTP subsystem on the session.
  fn sftp(&self) -> Result<Sftp, SafError> { Ok(self.session.sftp()?) }
}

impl Remote for RemoteHost {
  fn put(&mut self, local: &Path, target: &str) -> Result<u64, SafError> {
    let mut source = File::open(local)?;
    let mut remote = self.sftp()?.create(Path::new(target))?;
    let size = std::io::copy(&mut source, &mut remote)?;
    info!("  transfer done (total: {})", human_size(size));
    Ok(size)
  }

  fn get(&mut self, source: &str, local: &Path) -> Result<u64, SafError> {
    let mut remote = self.sftp()?.open(Path::new(source))?;
    let size = std::io::copy(&mut remote, &mut File::create(local)?)?;
    Ok(size)
  }

  fn list_dir(&mut self, dir: &str) -> Result<Vec<String>, SafError> {
    let entries = self.sftp()?.readdir(Path::new(dir))?;
    let mut names: Vec<String> = entries
      .into_iter()
      .filter_map(|(path, _)| path.file_name().map(|name| name.to_string_lossy().into_owned()))
      .collect();
    names.sort();
    Ok(names)
  }

  fn remove(&mut self, path: &str) -> Result<(), SafError> {
    self.sftp()?.unlink(Path::new(path))?;
    Ok(())
  }

  fn exec(&mut self, command: &str) -> Result<Vec<String>, SafError> {
    let rule = "-".repeat(100);
    info!("\n{rule}\n{command}\n{rule}");
    let mut channel = self.session.channel_session()?;
    channel.exec(command)?;
    self.session.set_blocking(false);
    let output = read_streams(channel.stream(0), channel.stderr());
    self.session.set_blocking(true);
    let (stdout, stderr) = output?;
    channel.wait_close()?;
    debug!("{} exited with {}", self.server, channel.exit_status()?);
    Ok(output_lines(&stdout, &stderr))
  }
}

/// Checks the server's host `key` against `known_hosts`.
///
/// A mismatch is always an error. Hosts without an entry are accepted with a warning unless
/// `strict_host_key_checking` is set.
pub fn verify_host_key(known_hosts: &KnownHosts, scp: &Scp, key: &[u8]) -> Result<(), SafError> {
  let file = scp.known_hosts_path();
  match known_hosts.check_port(&scp.server, scp.port, key) {
    CheckResult::Match => {
      debug!("host key of {} matches {}", scp.server, file.display());
      Ok(())
    },
    CheckResult::Mismatch => {
      error!("host key of {} differs from the one in {}", scp.server, file.display());
      Err(SafError::Remote(format!("host key mismatch for {}", scp.server)))
    },
    CheckResult::NotFound if scp.strict_host_key_checking =>
      Err(SafError::Remote(format!("{} is not a known host in {}", scp.server, file.display()))),
    CheckResult::NotFound => {
      warn!("{} is not listed in {}, accepting its host key", scp.server, file.display());
      Ok(())
    },
    CheckResult::Failure => Err(SafError::Remote(format!("host key check for {} failed", scp.server))),
  }
}

/// Reads one chunk of `stream` into `target`. Returns whether any bytes arrived.
fn read_chunk(
  stream: &mut impl Read,
  buf: &mut [u8],
  target: &mut Vec<u8>,
  done: &mut bool,
) -> Result<bool, SafError> {
  if *done {
    return Ok(false);
  }
  match stream.read(buf) {
    Ok(0) => {
      *done = true;
      Ok(false)
    },
    Ok(n) => {
      target.extend_from_slice(&buf[..n]);
      Ok(true)
    },
    Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => Ok(false),
    Err(e) => Err(e.into()),
  }
}

/// Reads both output streams of a command in turns until each reaches end of file.
///
/// The streams are expected to be non-blocking, so a command flooding one of them never
/// stalls while the other is waited on.
pub fn read_streams(mut stdout: impl Read, mut stderr: impl Read) -> Result<(String, String), SafError> {
  let mut buf = [0u8; 8192];
  let (mut out, mut err) = (Vec::new(), Vec::new());
  let (mut out_done, mut err_done) = (false, false);
  while !(out_done && err_done) {
    let progress = read_chunk(&mut stdout, &mut buf, &mut out, &mut out_done)?
      | read_chunk(&mut stderr, &mut buf, &mut err, &mut err_done)?;
    if !progress && !(out_done && err_done) {
      std::thread::sleep(Duration::from_millis(10));
    }
  }
  Ok((String::from_utf8_lossy(&out).into_owned(), String::from_utf8_lossy(&err).into_owned()))
}

/// Combines command output: the first stderr line as `ERROR: ...`, then every stdout line.
pub fn output_lines(stdout: &str, stderr: &str) -> Vec<String> {
  let mut lines = Vec::new();
  if let Some(line) = stderr.lines().find(|line| !line.trim().is_empty()) {
    error!("ERROR: {line}");
    lines.push(format!("ERROR: {line}"));
  }
  for line in stdout.lines() {
    info!("{line}");
    lines.push(line.to_string());
  }
  lines
}

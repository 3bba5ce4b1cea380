//! Email delivery of the run report.

use chrono::Local;
use lettre::{
  message::header::ContentType, transport::smtp::authentication::Credentials, AsyncSmtpTransport,
  AsyncTransport, Message, Tokio1Executor,
};

use super::*;
use crate::config::Email;

/// Subject line: `[ERROR]` when the report holds errors, `[Success]` otherwise.
pub fn subject(report: &Report) -> String {
  let state = if report.has_errors() { "[ERROR]" } else { "[Success]" };
  format!("{state} OJS-DSpace-Migration: Report")
}

/// Builds the plain text report mail.
pub fn build_message(email: &Email, report: &Report) -> Result<Message, SafError> {
  let body = format!("journal2saf run finished {}\n\n{report}", Local::now().format("%Y-%m-%d %H:%M:%S"));
  Ok(
    Message::builder()
      .from(email.sender.parse()?)
      .to(email.receiver.parse()?)
      .subject(subject(report))
      .header(ContentType::TEXT_PLAIN)
      .body(body)?,
  )
}

/// Sends the report via SMTP with STARTTLS.
///
/// SMTP failures are logged and swallowed; only an unusable configuration is returned as error.
pub async fn send_report(email: &Email, report: &Report) -> Result<(), SafError> {
  let message = build_message(email, report)?;
  let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&email.server)?
    .port(email.port)
    .credentials(Credentials::new(email.login.clone(), email.password.clone()))
    .build();
  match transport.send(message).await {
    Ok(_) => info!("report sent to {}", email.receiver),
    Err(e) => error!("Error in smtp session: {e}"),
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  fn email() -> Email {
    Email {
      enabled:  true,
      sender:   "journal2saf@example.com".into(),
      login:    "journal2saf".into(),
      password: "secret".into(),
      server:   "smtp.example.com".into(),
      port:     587,
      receiver: "operator@example.com".into(),
    }
  }

  #[test]
  fn test_subject() {
    let mut report = Report::default();
    report.add("processed journals", "hsg");
    assert_eq!(subject(&report), "[Success] OJS-DSpace-Migration: Report");
    report.add("error ssh:dspace.example.com", "connection refused");
    assert_eq!(subject(&report), "[ERROR] OJS-DSpace-Migration: Report");
  }

  #[test]
  fn test_build_message() -> anyhow::Result<()> {
    let mut report = Report::default();
    report.add("write zip file", "hsg_publication_id_102_submission_file_id_398.zip");
    let message = String::from_utf8(build_message(&email(), &report)?.formatted())?;
    assert!(message.contains("Subject: [Success] OJS-DSpace-Migration: Report"));
    assert!(message.contains("To: operator@example.com"));
    assert!(message.contains("hsg_publication_id_102_submission_file_id_398.zip"));
    Ok(())
  }

  #[test]
  fn test_invalid_sender_is_an_error() {
    let mut email = email();
    email.sender = "not an address".into();
    assert!(matches!(build_message(&email, &Report::default()), Err(SafError::Address(_))));
  }
}

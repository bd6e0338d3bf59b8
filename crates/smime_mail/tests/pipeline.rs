mod common;

use std::path::PathBuf;

use claims::{assert_err, assert_matches, assert_ok};
use smime_certs::CredentialBundle;
use smime_mail::{
    Mail, MailError, MailState, SecureMailPipeline, SecurityPolicy, SmimeError,
    UNENCRYPTED_SUBJECT_MARKER,
};

use crate::common::{FakeSmime, RecordingDispatcher, count_top_level_headers, signing_credentials};

fn mail(subject: &str) -> Mail {
    let mut mail = Mail::new(
        "forms@example.com",
        "office@example.com",
        subject,
        String::from("**Message:** {{ message }}\n"),
    );
    mail.add_to_context("message", "Please call me back");
    mail
}

fn bundle(sign: bool, encrypt: bool) -> CredentialBundle {
    CredentialBundle {
        signing: sign.then(signing_credentials),
        encryption_path: encrypt.then(|| PathBuf::from("/certs/office.crt")),
    }
}

fn pipeline(
    smime: FakeSmime,
    dispatcher: RecordingDispatcher,
) -> SecureMailPipeline<FakeSmime, RecordingDispatcher> {
    SecureMailPipeline::new(smime, dispatcher)
}

#[tokio::test]
async fn test_plain_message_when_encryption_not_requested() {
    let pipeline = pipeline(FakeSmime::default(), RecordingDispatcher::default());

    let message = pipeline
        .send(&mail("Contact"), &SecurityPolicy::default())
        .await
        .unwrap();
    assert_eq!(message.state(), MailState::Dispatched);

    let sent = pipeline.dispatcher().sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].subject, "Contact");
    assert_eq!(sent[0].state, MailState::Rendered);
    assert_eq!(sent[0].media_type, "multipart/alternative");
}

#[tokio::test]
async fn test_missing_certificate_marks_subject() {
    let pipeline = pipeline(FakeSmime::default(), RecordingDispatcher::default());

    pipeline
        .send(&mail("Contact"), &SecurityPolicy::required(bundle(false, false)))
        .await
        .unwrap();

    let sent = pipeline.dispatcher().sent();
    assert_eq!(
        sent[0].subject,
        format!("Contact{UNENCRYPTED_SUBJECT_MARKER}")
    );
    assert_eq!(sent[0].media_type, "multipart/alternative");
}

#[tokio::test]
async fn test_signed_only_still_marks_subject() {
    let pipeline = pipeline(FakeSmime::default(), RecordingDispatcher::default());

    pipeline
        .send(&mail("Contact"), &SecurityPolicy::required(bundle(true, false)))
        .await
        .unwrap();

    let sent = pipeline.dispatcher().sent();
    assert_eq!(sent[0].state, MailState::Signed);
    assert_eq!(sent[0].media_type, "multipart/signed");
    assert!(sent[0].subject.ends_with(UNENCRYPTED_SUBJECT_MARKER));
}

#[tokio::test]
async fn test_encrypted_only() {
    let pipeline = pipeline(FakeSmime::default(), RecordingDispatcher::default());

    pipeline
        .send(&mail("Contact"), &SecurityPolicy::required(bundle(false, true)))
        .await
        .unwrap();

    let sent = pipeline.dispatcher().sent();
    assert_eq!(sent[0].state, MailState::Encrypted);
    assert_eq!(sent[0].media_type, "application/pkcs7-mime");
    assert_eq!(sent[0].subject, "Contact");
}

#[tokio::test]
async fn test_signs_before_encrypting() {
    let pipeline = pipeline(FakeSmime::default(), RecordingDispatcher::default());

    let message = pipeline
        .seal(&mail("Contact"), &SecurityPolicy::required(bundle(true, true)))
        .await
        .unwrap();
    assert_eq!(message.state(), MailState::Encrypted);
    assert_eq!(
        message.body().unwrap().media_type().unwrap(),
        "application/pkcs7-mime"
    );
    assert_eq!(message.subject(), "Contact");

    let mut message = message;
    message.dispatch(pipeline.dispatcher()).await.unwrap();
    let sent = pipeline.dispatcher().sent();
    let formatted = String::from_utf8_lossy(&sent[0].formatted);
    assert!(!formatted.contains("Please call me back"));
}

#[tokio::test]
async fn test_call_order_is_sign_then_encrypt() {
    let pipeline = pipeline(FakeSmime::default(), RecordingDispatcher::default());

    assert_ok!(
        pipeline
            .send(&mail("Contact"), &SecurityPolicy::required(bundle(true, true)))
            .await
    );
    assert_eq!(
        pipeline.smime().calls(),
        vec![
            ("sign", String::from("multipart/alternative")),
            ("encrypt", String::from("multipart/signed")),
        ]
    );
}

#[tokio::test]
async fn test_signed_without_requirement_has_no_marker() {
    let pipeline = pipeline(FakeSmime::default(), RecordingDispatcher::default());
    let policy = SecurityPolicy {
        credentials: bundle(true, false),
        encryption_required: false,
    };

    pipeline.send(&mail("Contact"), &policy).await.unwrap();
    let sent = pipeline.dispatcher().sent();
    assert_eq!(sent[0].subject, "Contact");
    assert_eq!(sent[0].media_type, "multipart/signed");
}

#[tokio::test]
async fn test_marker_is_not_duplicated() {
    let pipeline = pipeline(FakeSmime::default(), RecordingDispatcher::default());
    let subject = format!("Contact{UNENCRYPTED_SUBJECT_MARKER}");

    pipeline
        .send(&mail(&subject), &SecurityPolicy::required(bundle(false, false)))
        .await
        .unwrap();
    assert_eq!(pipeline.dispatcher().sent()[0].subject, subject);
}

#[tokio::test]
async fn test_signing_failure_is_fatal() {
    let pipeline = pipeline(FakeSmime::failing("sign"), RecordingDispatcher::default());

    let result = pipeline
        .send(&mail("Contact"), &SecurityPolicy::required(bundle(true, true)))
        .await;
    assert_matches!(
        result,
        Err(MailError::SmimeError(SmimeError::Failed {
            operation: "sign",
            ..
        }))
    );
    assert!(pipeline.dispatcher().sent().is_empty());
    // encryption is never attempted on an unsigned body
    assert_eq!(pipeline.smime().calls().len(), 1);
}

#[tokio::test]
async fn test_encryption_failure_is_fatal() {
    let pipeline = pipeline(FakeSmime::failing("encrypt"), RecordingDispatcher::default());

    let result = pipeline
        .send(&mail("Contact"), &SecurityPolicy::required(bundle(false, true)))
        .await;
    assert_err!(result);
    assert!(pipeline.dispatcher().sent().is_empty());
}

#[tokio::test]
async fn test_transport_failure_moves_to_failed() {
    let pipeline = pipeline(FakeSmime::default(), RecordingDispatcher::failing());

    let mut message = pipeline
        .seal(&mail("Contact"), &SecurityPolicy::default())
        .await
        .unwrap();
    assert_matches!(
        message.dispatch(pipeline.dispatcher()).await,
        Err(MailError::LettreError(_))
    );
    assert_eq!(message.state(), MailState::Failed);

    // terminal state, no retry through the same message
    assert_matches!(
        message.dispatch(pipeline.dispatcher()).await,
        Err(MailError::InvalidTransition {
            from: MailState::Failed,
            to: MailState::Dispatched,
        })
    );
}

#[tokio::test]
async fn test_formatted_message_has_single_mime_version() {
    let pipeline = pipeline(FakeSmime::default(), RecordingDispatcher::default());

    pipeline
        .send(&mail("Contact"), &SecurityPolicy::required(bundle(true, true)))
        .await
        .unwrap();

    let sent = pipeline.dispatcher().sent();
    let formatted = &sent[0].formatted;
    assert_eq!(count_top_level_headers(formatted, "MIME-Version"), 1);
    assert_eq!(count_top_level_headers(formatted, "Subject"), 1);
    assert_eq!(count_top_level_headers(formatted, "Message-ID"), 1);
    let text = String::from_utf8_lossy(formatted);
    assert!(text.contains("Content-Type: application/pkcs7-mime; smime-type=enveloped-data"));
    assert!(text.contains("To: office@example.com"));
}

//! End-to-end tests for the relay driver: queue in a temporary directory,
//! lists from the fixture database, mail captured instead of sent.

mod common;

use assert_fs::prelude::*;
use assert_fs::TempDir;
use mail_parser::MessageParser;
use predicates::prelude::*;

use listrelay::config::Config;
use listrelay::lists::Store;
use listrelay::relay::transport::CapturingTransport;
use listrelay::relay::{Driver, RelayContext, RunSummary};
use listrelay::tracking::MailMetadata;

struct Harness {
    dir: TempDir,
    transport: CapturingTransport,
    ctx: RelayContext,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(|_| {})
    }

    fn with_config(adjust: impl FnOnce(&mut Config)) -> Self {
        Self::with_store(adjust, common::store())
    }

    fn with_store(adjust: impl FnOnce(&mut Config), store: Store) -> Self {
        let dir = TempDir::new().unwrap();
        let mut config = common::config(dir.path());
        adjust(&mut config);
        let transport = CapturingTransport::new();
        let resolver = listrelay::lists::ListResolver::new(store, &config.site, None);
        let ctx = RelayContext::new(config, resolver, Box::new(transport.clone()));
        Self {
            dir,
            transport,
            ctx,
        }
    }

    fn enqueue(&self, raw: &[u8], id: &str) {
        self.ctx.queue.enqueue(raw, Some(id)).unwrap();
    }

    fn run(&self) -> RunSummary {
        Driver::new(&self.ctx).run().unwrap()
    }

    fn tracking_text(&self, id: &str) -> String {
        std::fs::read_to_string(self.ctx.queue.tracking_path(id)).unwrap()
    }

    fn metadata(&self, id: &str) -> MailMetadata {
        MailMetadata::replay(&self.tracking_text(id)).unwrap()
    }

    /// Envelope recipients of every captured message, flattened.
    fn recipients(&self) -> Vec<String> {
        let mut all: Vec<String> = self
            .transport
            .sent()
            .into_iter()
            .flat_map(|m| m.to)
            .collect();
        all.sort();
        all
    }

    /// Tracking snapshots stored in the archive for `list`.
    fn archived_snapshots(&self, list: &str) -> Vec<String> {
        let dir = self.dir.path().join("archive").join(list);
        let Ok(entries) = std::fs::read_dir(dir) else {
            return Vec::new();
        };
        entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|x| x == "data"))
            .map(|p| std::fs::read_to_string(p).unwrap())
            .collect()
    }
}

fn reply(from: &str, to: &str, body: &str) -> Vec<u8> {
    format!(
        "From: {from}\r\n\
To: {to}\r\n\
Subject: Re: [MOD] Can I bring a friend?\r\n\
Authentication-Results: amazonses.com; spf=pass smtp.mailfrom=example.org; dkim=pass header.i=@example.org; dmarc=pass header.from=example.org\r\n\
X-SES-Spam-Verdict: PASS\r\n\
X-SES-Virus-Verdict: PASS\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
{body}\r\n"
    )
    .into_bytes()
}

const CERT_ALL: [&str; 5] = [
    "lee@example.org",
    "lou@example.org",
    "lynn@example.org",
    "pat@example.org",
    "robin@example.org",
];

// ─── Delivery ───────────────────────────────────────────────────────

#[test]
fn test_authorized_message_is_delivered_once_per_recipient() {
    let h = Harness::new();
    h.enqueue(&common::read_fixture("plain.eml"), "m1");

    let summary = h.run();
    assert_eq!(summary.handled, 1);
    assert_eq!(summary.completed, 1);
    assert_eq!(h.recipients(), CERT_ALL);
    for sent in h.transport.sent() {
        assert_eq!(sent.from, "cert+bounces@lists.example.org");
        assert_eq!(sent.to.len(), 1);
    }

    h.dir.child("queue/m1").assert(predicate::path::missing());
    h.dir.child("queue/m1.data").assert(predicate::path::missing());

    let snapshots = h.archived_snapshots("cert");
    assert_eq!(snapshots.len(), 1);
    let archived = MailMetadata::replay(&snapshots[0]).unwrap();
    assert!(archived.sent_to_list.contains("cert"));
    assert_eq!(archived.sent.len(), 5);

    // A second run finds nothing to do
    let again = h.run();
    assert_eq!(again.handled, 0);
    assert_eq!(h.transport.sent().len(), 5);
}

#[test]
fn test_subscriber_copy_is_personalized() {
    let h = Harness::new();
    h.enqueue(&common::read_fixture("plain.eml"), "m1");
    h.run();

    let pat = h.transport.sent_to("pat@example.org");
    assert_eq!(pat.len(), 1);
    let text = pat[0].text();
    assert!(text.contains("From: \"Pat Member via CERT Team\" <cert@lists.example.org>\r\n"));
    assert!(text.contains("Reply-To: Pat Member <pat@example.org>\r\n"));
    assert!(text.contains("List-Id: \"CERT Team\" <cert.lists.example.org>\r\n"));
    assert!(text.contains("List-Unsubscribe: <https://example.org/unsubscribe/tok-pat/cert>\r\n"));
    assert!(text.contains("List-Unsubscribe-Post: List-Unsubscribe=One-Click\r\n"));
    assert!(!text.contains("DKIM-Signature"));
    assert!(!text.contains("old.example.com"));
    assert!(!text.contains("X-SES-"));
    assert!(text.contains("Subject: Drill on Saturday\r\n"));
    assert!(text.contains(
        "This message was sent to Pat Member <pat@example.org> via the CERT Team mailing list."
    ));
    assert!(text.contains("To unsubscribe, visit https://example.org/unsubscribe/tok-pat/cert"));

    // Each subscriber gets their own link
    let robin = h.transport.sent_to("robin@example.org")[0].text();
    assert!(robin.contains("/unsubscribe/tok-robin/cert"));
    assert!(!robin.contains("tok-pat"));
}

#[test]
fn test_blind_copy_has_no_footer() {
    let h = Harness::new();
    h.enqueue(&common::read_fixture("plain.eml"), "m1");
    h.run();

    let lynn = h.transport.sent_to("lynn@example.org")[0].text();
    assert!(lynn.contains("From: \"Pat Member via CERT Team\" <cert@lists.example.org>"));
    assert!(!lynn.contains("List-Unsubscribe"));
    assert!(!lynn.contains("To unsubscribe"));
    assert!(lynn.ends_with("Pat\r\n"));
}

#[test]
fn test_multipart_copy_keeps_attachment() {
    let h = Harness::new();
    h.enqueue(&common::read_fixture("mixed.eml"), "m2");
    assert_eq!(h.run().completed, 1);

    let pat = &h.transport.sent_to("pat@example.org")[0];
    assert!(pat.text().contains("MDk6MDAgQnJpZWZpbmcKMDk6MzAgUmFkaW8gY2hlY2sK"));
    let parsed = MessageParser::default().parse(&pat.data).unwrap();
    let plain = parsed.body_text(0).unwrap();
    assert!(plain.contains("Café opens at 8."));
    assert!(plain.contains("This message was sent to Pat Member <pat@example.org>"));
    let html = parsed.body_html(0).unwrap();
    assert!(html.contains("To unsubscribe, visit https://example.org/unsubscribe/tok-pat/cert"));
    assert!(html.trim_end().ends_with("</body></html>"));
}

#[test]
fn test_copy_sent_once_across_lists() {
    let h = Harness::new();
    let raw = b"From: Lee Leader <lee@example.org>\r\n\
To: cert@lists.example.org, role-42-bgcheck@lists.example.org\r\n\
Subject: Both lists\r\n\
Authentication-Results: mx; spf=pass; dkim=pass; dmarc=pass\r\n\
X-SES-Spam-Verdict: PASS\r\n\
X-SES-Virus-Verdict: PASS\r\n\
\r\n\
Hello.\r\n";
    h.enqueue(raw, "m3");
    let summary = h.run();
    assert_eq!(summary.completed, 1);

    let mut expected: Vec<&str> = CERT_ALL.to_vec();
    expected.push("quinn@example.org");
    expected.sort();
    assert_eq!(h.recipients(), expected);
    assert_eq!(h.archived_snapshots("cert").len(), 1);
    assert_eq!(h.archived_snapshots("role-42-bgcheck").len(), 1);
}

#[test]
fn test_resume_skips_recorded_sends() {
    let h = Harness::new();
    h.enqueue(&common::read_fixture("plain.eml"), "m1");
    std::fs::write(
        h.ctx.queue.tracking_path("m1"),
        "R 2024-06-03T16:15:00Z cert\n\
V 2024-06-03T16:15:00Z PASS PASS PASS PASS PASS\n\
S 2024-06-03T16:15:01Z pat@example.org\n\
S 2024-06-03T16:15:02Z lee@example.org\n",
    )
    .unwrap();

    assert_eq!(h.run().completed, 1);
    assert_eq!(
        h.recipients(),
        vec!["lou@example.org", "lynn@example.org", "robin@example.org"]
    );
}

#[test]
fn test_failed_send_is_retried_without_duplicates() {
    let h = Harness::new();
    h.transport.refuse("robin@example.org");
    h.enqueue(&common::read_fixture("plain.eml"), "m1");

    let summary = h.run();
    assert_eq!(summary.retried, 1);
    assert_eq!(h.transport.sent().len(), 4);
    assert!(h.ctx.queue.is_pending("m1").unwrap());
    let metadata = h.metadata("m1");
    assert_eq!(metadata.sent.len(), 4);
    assert!(!metadata.sent_to_list.contains("cert"));
    assert!(h.archived_snapshots("cert").is_empty());

    h.transport.accept_all();
    let summary = h.run();
    assert_eq!(summary.completed, 1);
    assert_eq!(h.recipients(), CERT_ALL);
    assert_eq!(h.archived_snapshots("cert").len(), 1);
}

#[test]
fn test_invalid_recipient_address_is_skipped() {
    let store = common::store_with(
        "INSERT INTO person (id, email, informal_name, sort_name, unsubscribe_token) \
         VALUES (20, 'bogus', 'Bad Address', 'address, bad', 'tok-bad');
         INSERT INTO list_person (list, person, subscribed, unsubscribed, sender) \
         VALUES (1, 20, 1, 0, 0);",
    );
    let h = Harness::with_store(|_| {}, store);
    h.enqueue(&common::read_fixture("plain.eml"), "m1");

    let summary = h.run();
    assert_eq!(summary.completed, 1);
    assert_eq!(summary.retried, 0);
    assert_eq!(h.recipients(), CERT_ALL);
    assert_eq!(h.archived_snapshots("cert").len(), 1);
    assert!(h.archived_snapshots("cert")[0].contains("Skipped invalid address \"bogus\" on cert"));
    h.dir.child("queue/m1").assert(predicate::path::missing());
}

// ─── Dry run ────────────────────────────────────────────────────────

#[test]
fn test_dry_run_leaves_queue_and_archive_alone() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("portal.db");
    common::database_file(&db);
    let mut config = common::config(dir.path());
    config.store.db_path = db;
    config.queue.stale_after_days = 0;
    let ctx = RelayContext::open(config, true).unwrap();

    ctx.queue
        .enqueue(&common::read_fixture("plain.eml"), Some("m1"))
        .unwrap();
    ctx.queue
        .enqueue(&common::read_fixture("unauthorized.eml"), Some("old"))
        .unwrap();
    ctx.queue.set_pending("old", false).unwrap();
    let before = std::fs::read(ctx.queue.tracking_path("m1")).unwrap();

    let summary = Driver::new(&ctx).run().unwrap();
    assert_eq!(summary.completed, 1);
    assert_eq!(summary.reclaimed, 0);

    assert!(ctx.queue.is_pending("m1").unwrap());
    assert_eq!(std::fs::read(ctx.queue.tracking_path("m1")).unwrap(), before);
    dir.child("queue/old").assert(predicate::path::exists());
    dir.child("archive").assert(predicate::path::missing());

    // Nothing was recorded, so a second dry run sees the same work
    assert_eq!(Driver::new(&ctx).run().unwrap().completed, 1);
}

#[test]
fn test_dry_run_holds_without_clearing_pending() {
    let h = Harness::new();
    let h = Harness {
        ctx: h.ctx.with_dry_run(true),
        ..h
    };
    h.enqueue(&common::read_fixture("unauthorized.eml"), "h1");
    let summary = h.run();
    assert_eq!(summary.awaiting_moderation, 1);
    assert_eq!(h.transport.sent().len(), 1);
    assert!(h.ctx.queue.is_pending("h1").unwrap());
    assert!(h.tracking_text("h1").is_empty());
}

// ─── Moderation ─────────────────────────────────────────────────────

#[test]
fn test_unauthorized_sender_is_held_then_approved() {
    let h = Harness::new();
    h.enqueue(&common::read_fixture("unauthorized.eml"), "h1");

    let summary = h.run();
    assert_eq!(summary.awaiting_moderation, 1);
    let sent = h.transport.sent();
    assert_eq!(sent.len(), 1);
    let request = &sent[0];
    assert_eq!(
        request.to,
        vec!["lee@example.org", "lou@example.org", "lynn@example.org"]
    );
    assert_eq!(request.from, "cert+bounces@lists.example.org");
    let text = request.text();
    assert!(text.contains("Subject: [MOD] Can I bring a friend?"));
    assert!(text.contains("[MOD]MSGID:h1"));
    assert!(text.contains("robin@example.org is not authorized to send to this list."));

    assert!(!h.ctx.queue.is_pending("h1").unwrap());
    assert!(h.metadata("h1").moderating.contains("cert"));

    // Nothing happens until a moderator answers
    assert_eq!(h.run().handled, 0);
    assert_eq!(h.transport.sent().len(), 1);

    h.enqueue(
        &reply(
            "Lou Leader <lou@example.org>",
            "cert-mod@lists.example.org",
            "Fine by me.\r\n\r\n> [MOD]MSGID:h1",
        ),
        "r1",
    );
    let summary = h.run();
    assert_eq!(summary.handled, 2);
    assert_eq!(summary.completed, 2);
    h.dir.child("queue/h1").assert(predicate::path::missing());
    h.dir.child("queue/r1").assert(predicate::path::missing());

    let delivered: Vec<_> = h.transport.sent().into_iter().skip(1).collect();
    assert_eq!(delivered.len(), 5);
    assert!(delivered
        .iter()
        .all(|m| m.text().contains("Robin Member via CERT Team")));

    let snapshots = h.archived_snapshots("cert");
    assert_eq!(snapshots.len(), 1);
    assert!(snapshots[0]
        .lines()
        .any(|l| l.starts_with("A ") && l.ends_with(" cert lou@example.org")));
}

#[test]
fn test_reply_from_non_moderator_is_ignored() {
    let h = Harness::new();
    h.enqueue(&common::read_fixture("unauthorized.eml"), "h1");
    h.run();

    h.enqueue(
        &reply(
            "Robin Member <robin@example.org>",
            "cert-mod@lists.example.org",
            "[MOD]MSGID:h1",
        ),
        "r1",
    );
    let summary = h.run();
    assert_eq!(summary.handled, 1);
    assert_eq!(summary.completed, 1);
    assert_eq!(h.transport.sent().len(), 1);
    assert!(!h.ctx.queue.is_pending("h1").unwrap());
    assert!(h.metadata("h1").approved.is_empty());
}

#[test]
fn test_reply_naming_itself_is_ignored() {
    let h = Harness::new();
    h.enqueue(
        &reply(
            "Lou Leader <lou@example.org>",
            "cert-mod@lists.example.org",
            "[MOD]MSGID:r1",
        ),
        "r1",
    );
    let summary = h.run();
    assert_eq!(summary.completed, 1);
    assert!(h.transport.sent().is_empty());
    h.dir.child("queue/r1").assert(predicate::path::missing());
}

#[test]
fn test_reply_without_marker_is_ignored() {
    let h = Harness::new();
    h.enqueue(&common::read_fixture("unauthorized.eml"), "h1");
    h.run();

    h.enqueue(
        &reply("Lou Leader <lou@example.org>", "cert-mod@lists.example.org", "Yes."),
        "r1",
    );
    assert_eq!(h.run().completed, 1);
    assert_eq!(h.transport.sent().len(), 1);
    assert!(h.metadata("h1").approved.is_empty());
}

#[test]
fn test_failed_authentication_is_held() {
    let h = Harness::new();
    let raw = String::from_utf8(common::read_fixture("plain.eml"))
        .unwrap()
        .replace("dkim=pass", "dkim=fail");
    h.enqueue(raw.as_bytes(), "m1");

    assert_eq!(h.run().awaiting_moderation, 1);
    let request = h.transport.sent()[0].text();
    assert!(request.contains("The DKIM verdict is FAIL."));
    assert!(h.metadata("m1").verdicts.unwrap().dkim == "FAIL");
}

// ─── Unknown and unaddressed ────────────────────────────────────────

#[test]
fn test_unknown_list_is_forwarded_to_admins() {
    let h = Harness::new();
    let raw = b"From: Stranger <who@example.net>\r\n\
To: nosuch@lists.example.org\r\n\
Subject: Hello?\r\n\
\r\n\
Is anyone there?\r\n";
    h.enqueue(raw, "u1");

    assert_eq!(h.run().completed, 1);
    let sent = h.transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, vec!["ann@example.org"]);
    assert_eq!(sent[0].from, "admin@lists.example.org");
    let text = sent[0].text();
    assert!(text.contains("Subject: [ADMIN] Hello?"));
    assert!(text.contains("No such mailing list \"nosuch\"."));
    assert!(text.contains("message/rfc822"));
}

#[test]
fn test_message_for_no_list_completes() {
    let h = Harness::new();
    h.enqueue(b"From: a@example.net\r\nTo: b@example.net\r\n\r\nhi\r\n", "n1");
    assert_eq!(h.run().completed, 1);
    assert!(h.transport.sent().is_empty());
}

// ─── Queue upkeep ───────────────────────────────────────────────────

#[test]
fn test_unprocessable_tracking_file_is_left_alone() {
    let h = Harness::new();
    h.enqueue(&common::read_fixture("plain.eml"), "m1");
    std::fs::write(h.ctx.queue.tracking_path("m1"), "Q 2024-06-03T16:15:00Z what\n").unwrap();

    let summary = h.run();
    assert_eq!(summary.failed, 1);
    assert!(h.transport.sent().is_empty());
    assert!(h.ctx.queue.is_pending("m1").unwrap());
}

#[test]
fn test_stale_entries_are_reclaimed() {
    let h = Harness::with_config(|c| c.queue.stale_after_days = 0);
    h.enqueue(&common::read_fixture("unauthorized.eml"), "old");
    h.ctx.queue.set_pending("old", false).unwrap();

    let summary = h.run();
    assert_eq!(summary.reclaimed, 1);
    assert_eq!(summary.handled, 0);
    h.dir.child("queue/old").assert(predicate::path::missing());
}

//! Messages the relay writes itself: moderation requests and administrator
//! forwards. Both carry the original as a `message/rfc822` attachment.

use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::Address;

use crate::config::SiteConfig;
use crate::error::{RelayError, Result};
use crate::mime::Message;
use crate::model::list::List;

/// Prefix of the line that ties a moderator's reply to the held message.
pub const MOD_MARKER: &str = "[MOD]MSGID:";

/// Local-part suffix of a list's moderation address.
pub const MOD_SUFFIX: &str = "-mod";

/// A generated message ready for the transport.
#[derive(Debug, Clone)]
pub struct Forward {
    pub from: String,
    pub to: Vec<String>,
    pub data: Vec<u8>,
}

/// `<list>-mod@<domain>`: where moderators send approvals.
pub fn moderation_address(site: &SiteConfig, list: &str) -> String {
    site.list_address(&format!("{list}{MOD_SUFFIX}"))
}

/// `<list>+bounces@<domain>`: envelope sender of everything sent for a list.
pub fn bounce_address(site: &SiteConfig, list: &str) -> String {
    site.list_address(&format!("{list}+bounces"))
}

fn mailbox(name: Option<String>, address: &str) -> Result<Mailbox> {
    let addr: Address = address
        .parse()
        .map_err(|_| RelayError::Address(address.to_string()))?;
    Ok(Mailbox::new(name, addr))
}

fn original_attachment(raw: &[u8]) -> Result<SinglePart> {
    let content_type = ContentType::parse("message/rfc822")
        .map_err(|e| RelayError::Message(e.to_string()))?;
    Ok(Attachment::new("original.eml".to_string()).body(raw.to_vec(), content_type))
}

fn summary(message: &Message) -> String {
    format!(
        "From: {}\nSubject: {}\n",
        message.from_header().unwrap_or_else(|| "(unknown)".into()),
        message.subject()
    )
}

/// Ask `moderators` to approve `message` (queue ID `id`) for `list`.
pub fn moderation_request(
    site: &SiteConfig,
    list: &List,
    message: &Message,
    raw: &[u8],
    id: &str,
    reasons: &[String],
    moderators: &[String],
) -> Result<Forward> {
    let mod_address = moderation_address(site, &list.name);
    let mut text = format!(
        "A message sent to the {} list ({})\nneeds your approval before it is delivered.\n\n{}\n",
        list.display_name,
        site.list_address(&list.name),
        summary(message)
    );
    if !reasons.is_empty() {
        text.push_str("It was held because:\n");
        for reason in reasons {
            text.push_str(&format!("  - {reason}\n"));
        }
        text.push('\n');
    }
    text.push_str(
        "To approve it, reply to this message and keep the following\nline in your reply:\n\n",
    );
    text.push_str(&format!("{MOD_MARKER}{id}\n"));

    let from = mailbox(Some(format!("{} moderation", list.display_name)), &mod_address)?;
    let mut builder = lettre::Message::builder()
        .from(from.clone())
        .reply_to(from)
        .subject(format!("[MOD] {}", message.subject()));
    for moderator in moderators {
        builder = builder.to(mailbox(None, moderator)?);
    }
    let email = builder
        .multipart(
            MultiPart::mixed()
                .singlepart(SinglePart::plain(text))
                .singlepart(original_attachment(raw)?),
        )
        .map_err(|e| RelayError::Message(e.to_string()))?;

    Ok(Forward {
        from: bounce_address(site, &list.name),
        to: moderators.to_vec(),
        data: email.formatted(),
    })
}

/// Send `message` to the administrators with an explanatory `note`.
pub fn admin_forward(
    site: &SiteConfig,
    message: &Message,
    raw: &[u8],
    note: &str,
    admins: &[String],
) -> Result<Forward> {
    let text = format!(
        "{note}\n\n{}\nThe original message is attached.\n",
        summary(message)
    );
    let mut builder = lettre::Message::builder()
        .from(mailbox(Some("List relay".to_string()), &site.from_address)?)
        .subject(format!("[ADMIN] {}", message.subject()));
    if let Some(from) = message.from() {
        if let Ok(reply_to) = mailbox(None, &from.address) {
            builder = builder.reply_to(reply_to);
        }
    }
    for admin in admins {
        builder = builder.to(mailbox(None, admin)?);
    }
    let email = builder
        .multipart(
            MultiPart::mixed()
                .singlepart(SinglePart::plain(text))
                .singlepart(original_attachment(raw)?),
        )
        .map_err(|e| RelayError::Message(e.to_string()))?;

    Ok(Forward {
        from: site.from_address.clone(),
        to: admins.to_vec(),
        data: email.formatted(),
    })
}

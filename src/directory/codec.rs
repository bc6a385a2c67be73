//! XML persistence for the channel directory.
//!
//! The document is a `<directory>` root holding one `<channel id="...">`
//! element per record:
//!
//! ```xml
//! <directory>
//!   <channel id="ResearchBlog">
//!     <format>rss</format>
//!     <type>webnews</type>
//!     ...
//!     <schedule>
//!       <updatePeriod>daily</updatePeriod>
//!       <updateFrequency>4</updateFrequency>
//!     </schedule>
//!     <feed title="Research Blog" url="https://www.zscaler.com/blogs/feeds/security-research"/>
//!   </channel>
//! </directory>
//! ```
//!
//! Elements are read by local name, so older documents that qualify fields
//! with `dc:`, `iso:` or `ocs:` prefixes load unchanged.

use std::fmt::Display;
use std::io::Write;
use std::path::Path;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use tracing::{debug, info};
use url::Url;

use super::model::{ChannelRecord, FeedEntry, Instance};
use super::store::Directory;
use crate::error::{Error, Result};
use crate::feed::charset;

fn ser_err(e: impl Display) -> Error {
    Error::Serialization(e.to_string())
}

fn de_err(e: impl Display) -> Error {
    Error::Deserialization(e.to_string())
}

pub fn encode_feed_url(url: &Url) -> String {
    url.as_str().to_string()
}

pub fn decode_feed_url(raw: &str) -> Result<Url> {
    Url::parse(raw.trim())
        .map_err(|e| Error::Deserialization(format!("invalid feed url {:?}: {}", raw, e)))
}

/// Serializes the directory, records in store order.
pub fn dump(directory: &Directory) -> Result<Vec<u8>> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(ser_err)?;
    writer
        .write_event(Event::Start(BytesStart::new("directory")))
        .map_err(ser_err)?;

    directory.with_channels(|records| {
        records
            .iter()
            .try_for_each(|record| write_channel(&mut writer, record))
    })?;

    writer
        .write_event(Event::End(BytesEnd::new("directory")))
        .map_err(ser_err)?;

    let mut out = writer.into_inner();
    out.push(b'\n');
    Ok(out)
}

fn write_channel<W: Write>(writer: &mut Writer<W>, record: &ChannelRecord) -> Result<()> {
    let mut channel = BytesStart::new("channel");
    channel.push_attribute(("id", record.id.as_str()));
    writer.write_event(Event::Start(channel)).map_err(ser_err)?;

    write_text(writer, "format", &record.format)?;
    write_text(writer, "type", &record.kind)?;
    write_text(writer, "subject", &record.subject)?;
    write_text(writer, "description", &record.description)?;
    write_text(writer, "identifier", &record.identifier)?;
    write_text(writer, "encoding", &record.encoding)?;
    write_text(writer, "country", &record.country)?;
    write_text(writer, "region", &record.region)?;
    write_text(writer, "category", &record.category)?;
    write_text(writer, "ranking", &record.ranking.to_string())?;
    write_text(writer, "language", &record.language)?;

    writer
        .write_event(Event::Start(BytesStart::new("schedule")))
        .map_err(ser_err)?;
    write_text(writer, "updatePeriod", &record.update_period)?;
    write_text(writer, "updateFrequency", &record.update_frequency.to_string())?;
    writer
        .write_event(Event::End(BytesEnd::new("schedule")))
        .map_err(ser_err)?;

    for entry in &record.feeds {
        let url = encode_feed_url(&entry.url);
        let mut feed = BytesStart::new("feed");
        feed.push_attribute(("title", entry.title.as_str()));
        feed.push_attribute(("url", url.as_str()));
        writer.write_event(Event::Empty(feed)).map_err(ser_err)?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("channel")))
        .map_err(ser_err)?;
    Ok(())
}

fn write_text<W: Write>(writer: &mut Writer<W>, name: &str, value: &str) -> Result<()> {
    writer
        .write_event(Event::Start(BytesStart::new(name)))
        .map_err(ser_err)?;
    // An empty text event keeps the closing tag on the same line.
    writer
        .write_event(Event::Text(BytesText::new(value)))
        .map_err(ser_err)?;
    writer
        .write_event(Event::End(BytesEnd::new(name)))
        .map_err(ser_err)?;
    Ok(())
}

/// Parses a directory document. Records go through [`Directory::add`], so
/// repeated identifiers merge their feed entries.
pub fn load(bytes: &[u8], instance: Instance) -> Result<Directory> {
    let decoded = charset::decode(bytes, None).map_err(de_err)?;
    let directory = Directory::new(instance);

    let mut reader = Reader::from_str(&decoded.text);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<String> = Vec::new();
    let mut value = String::new();
    let mut current: Option<ChannelRecord> = None;
    let mut seen_root = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if !seen_root {
                    check_root(&name)?;
                    seen_root = true;
                }
                match (stack.len(), name.as_str()) {
                    (1, "channel") => current = Some(start_channel(&e, &reader)?),
                    (2, "feed") => push_feed(&e, &reader, current.as_mut())?,
                    _ => {}
                }
                stack.push(name);
                value.clear();
            }
            Ok(Event::Empty(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if !seen_root {
                    check_root(&name)?;
                    seen_root = true;
                }
                match (stack.len(), name.as_str()) {
                    (1, "channel") => {
                        directory.add(start_channel(&e, &reader)?);
                    }
                    (2, "feed") => push_feed(&e, &reader, current.as_mut())?,
                    _ => {
                        if let Some(record) = current.as_mut() {
                            stack.push(name);
                            assign(record, &stack, "")?;
                            stack.pop();
                        }
                    }
                }
            }
            Ok(Event::Text(t)) => {
                let text = t.unescape().map_err(de_err)?;
                value.push_str(&text);
            }
            Ok(Event::CData(c)) => {
                value.push_str(&String::from_utf8_lossy(&c.into_inner()));
            }
            Ok(Event::End(_)) => {
                if stack.len() == 2 && stack[1] == "channel" {
                    if let Some(record) = current.take() {
                        directory.add(record);
                    }
                } else if let Some(record) = current.as_mut() {
                    assign(record, &stack, value.trim())?;
                }
                stack.pop();
                value.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(Error::Deserialization(format!(
                    "malformed directory at byte {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
            _ => {}
        }
    }

    if !seen_root {
        return Err(Error::Deserialization("document has no root element".to_string()));
    }

    debug!("Loaded {} channel(s)", directory.len());
    Ok(directory)
}

fn check_root(name: &str) -> Result<()> {
    if name == "directory" {
        Ok(())
    } else {
        Err(Error::Deserialization(format!(
            "expected element <directory> but have <{}>",
            name
        )))
    }
}

fn start_channel(e: &BytesStart<'_>, reader: &Reader<&[u8]>) -> Result<ChannelRecord> {
    let mut record = ChannelRecord::default();
    for attr in e.attributes() {
        let attr = attr.map_err(de_err)?;
        if attr.key.local_name().as_ref() == b"id" {
            record.id = attr
                .decode_and_unescape_value(reader.decoder())
                .map_err(de_err)?
                .into_owned();
        }
    }
    Ok(record)
}

fn push_feed(
    e: &BytesStart<'_>,
    reader: &Reader<&[u8]>,
    record: Option<&mut ChannelRecord>,
) -> Result<()> {
    let Some(record) = record else {
        return Ok(());
    };

    let mut title = String::new();
    let mut url = None;
    for attr in e.attributes() {
        let attr = attr.map_err(de_err)?;
        let value = attr
            .decode_and_unescape_value(reader.decoder())
            .map_err(de_err)?;
        match attr.key.local_name().as_ref() {
            b"title" => title = value.into_owned(),
            b"url" => url = Some(decode_feed_url(&value)?),
            _ => {}
        }
    }

    let url = url.ok_or_else(|| {
        Error::Deserialization(format!("feed element without url in channel {}", record.id))
    })?;
    record.feeds.insert(FeedEntry::new(title, url));
    Ok(())
}

fn assign(record: &mut ChannelRecord, stack: &[String], value: &str) -> Result<()> {
    let path: Vec<&str> = stack.iter().map(String::as_str).collect();
    match path.as_slice() {
        [_, "channel", field] => match *field {
            "format" => record.format = value.to_string(),
            "type" => record.kind = value.to_string(),
            "subject" => record.subject = value.to_string(),
            "description" => record.description = value.to_string(),
            "identifier" => record.identifier = value.to_string(),
            "encoding" => record.encoding = value.to_string(),
            "country" => record.country = value.to_string(),
            "region" => record.region = value.to_string(),
            "category" => record.category = value.to_string(),
            "ranking" => record.ranking = parse_int("ranking", value)?,
            "language" => record.language = value.to_string(),
            _ => {}
        },
        [_, "channel", "schedule", field] => match *field {
            "updatePeriod" => record.update_period = value.to_string(),
            "updateFrequency" => record.update_frequency = parse_int("updateFrequency", value)?,
            _ => {}
        },
        _ => {}
    }
    Ok(())
}

fn parse_int(field: &str, value: &str) -> Result<i64> {
    if value.is_empty() {
        return Ok(0);
    }
    value.parse().map_err(|e| {
        Error::Deserialization(format!("invalid integer {:?} for {}: {}", value, field, e))
    })
}

pub fn load_file(path: impl AsRef<Path>, instance: Instance) -> Result<Directory> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)?;
    let directory = load(&bytes, instance)?;
    info!(
        "Loaded {} channel(s) with {} feed(s) from {}",
        directory.len(),
        directory.feed_count(),
        path.display()
    );
    Ok(directory)
}

pub fn dump_to_writer<W: Write>(directory: &Directory, mut out: W) -> Result<()> {
    let bytes = dump(directory)?;
    out.write_all(&bytes)?;
    out.flush()?;
    Ok(())
}

/// Writes the directory next to `path` first and renames it into place, so
/// an interrupted run never leaves a truncated file behind.
pub fn dump_file(directory: &Directory, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let bytes = dump(directory)?;

    let parent = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(&bytes)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;

    info!(
        "Wrote {} channel(s) to {}",
        directory.len(),
        path.display()
    );
    Ok(())
}

//! Package manifest (`.nuspec`) field rewriting.
//!
//! The manifest is streamed through quick-xml and re-emitted event by event,
//! so everything outside the targeted `package/metadata/<field>` elements is
//! preserved as written.

use crate::edit::{FieldMutation, ManifestField};
use crate::{Error, Result};
use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};

const UTF8_BOM: &str = "\u{feff}";

fn corrupt(msg: impl Into<String>) -> Error {
    Error::CorruptArchive(msg.into())
}

fn decode(xml: &[u8]) -> Result<(bool, &str)> {
    let text = std::str::from_utf8(xml).map_err(|e| corrupt(format!("manifest is not UTF-8: {e}")))?;
    Ok(match text.strip_prefix(UTF8_BOM) {
        Some(rest) => (true, rest),
        None => (false, text),
    })
}

fn in_metadata(path: &[Vec<u8>]) -> bool {
    matches!(path, [package, metadata] if package == b"package" && metadata == b"metadata")
}

/// Collapse mutations to one value per field, keeping first-seen order and the last value.
fn collapse(mutations: &[FieldMutation]) -> Vec<(ManifestField, &str)> {
    let mut pending: Vec<(ManifestField, &str)> = Vec::new();
    for mutation in mutations {
        match pending.iter_mut().find(|(field, _)| *field == mutation.field) {
            Some(slot) => slot.1 = &mutation.value,
            None => pending.push((mutation.field, &mutation.value)),
        }
    }
    pending
}

/// Overwrite manifest fields, appending any that are absent to `metadata`.
pub(crate) fn rewrite(xml: &[u8], mutations: &[FieldMutation]) -> Result<Vec<u8>> {
    let (has_bom, text) = decode(xml)?;
    let pending = collapse(mutations);
    let mut applied = vec![false; pending.len()];

    let mut reader = Reader::from_str(text);
    let mut writer = Writer::new(Vec::with_capacity(xml.len()));
    if has_bom {
        writer.get_mut().extend_from_slice(UTF8_BOM.as_bytes());
    }

    let mut path: Vec<Vec<u8>> = Vec::new();
    let mut saw_metadata = false;
    let mut metadata_prefix: Option<String> = None;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| corrupt(format!("manifest XML error: {e}")))?;
        match event {
            Event::Start(start) => {
                if path.is_empty() && start.local_name().as_ref() != b"package" {
                    return Err(corrupt("manifest root element is not <package>"));
                }
                let target = in_metadata(&path)
                    .then(|| ManifestField::from_element_name(start.local_name().as_ref()))
                    .flatten()
                    .and_then(|field| pending.iter().position(|(f, _)| *f == field));

                if let Some(slot) = target {
                    let end = skip_element(&mut reader)?;
                    emit(&mut writer, Event::Start(start))?;
                    emit(&mut writer, Event::Text(BytesText::new(pending[slot].1)))?;
                    emit(&mut writer, Event::End(end))?;
                    applied[slot] = true;
                } else {
                    path.push(start.local_name().as_ref().to_vec());
                    if in_metadata(&path) {
                        saw_metadata = true;
                        metadata_prefix = prefix_of(&start);
                    }
                    emit(&mut writer, Event::Start(start))?;
                }
            }
            Event::Empty(start) => {
                let target = in_metadata(&path)
                    .then(|| ManifestField::from_element_name(start.local_name().as_ref()))
                    .flatten()
                    .and_then(|field| pending.iter().position(|(f, _)| *f == field));

                match target {
                    Some(slot) => {
                        let (open, name) = reopen(&start);
                        emit(&mut writer, Event::Start(open))?;
                        emit(&mut writer, Event::Text(BytesText::new(pending[slot].1)))?;
                        emit(&mut writer, Event::End(BytesEnd::new(name)))?;
                        applied[slot] = true;
                    }
                    None if path.len() == 1 && start.local_name().as_ref() == b"metadata" => {
                        // <metadata/> holds nothing yet; open it so missing fields can be appended
                        saw_metadata = true;
                        let prefix = prefix_of(&start);
                        let (open, name) = reopen(&start);
                        emit(&mut writer, Event::Start(open))?;
                        append_missing(&mut writer, prefix.as_deref(), &pending, &mut applied)?;
                        emit(&mut writer, Event::End(BytesEnd::new(name)))?;
                    }
                    None => emit(&mut writer, Event::Empty(start))?,
                }
            }
            Event::End(end) => {
                if in_metadata(&path) {
                    append_missing(
                        &mut writer,
                        metadata_prefix.as_deref(),
                        &pending,
                        &mut applied,
                    )?;
                }
                path.pop();
                emit(&mut writer, Event::End(end))?;
            }
            Event::Eof => break,
            other => emit(&mut writer, other)?,
        }
    }

    if !saw_metadata {
        return Err(corrupt("manifest has no package/metadata element"));
    }
    Ok(writer.into_inner())
}

/// Read the text content of a manifest field, if the element is present.
pub(crate) fn read_field(xml: &[u8], field: ManifestField) -> Result<Option<String>> {
    let (_, text) = decode(xml)?;
    let mut reader = Reader::from_str(text);
    let mut path: Vec<Vec<u8>> = Vec::new();

    loop {
        let event = reader
            .read_event()
            .map_err(|e| corrupt(format!("manifest XML error: {e}")))?;
        match event {
            Event::Start(start) => {
                if in_metadata(&path) && start.local_name().as_ref() == field.element_name().as_bytes() {
                    return collect_text(&mut reader).map(Some);
                }
                path.push(start.local_name().as_ref().to_vec());
            }
            Event::Empty(start) => {
                if in_metadata(&path) && start.local_name().as_ref() == field.element_name().as_bytes() {
                    return Ok(Some(String::new()));
                }
            }
            Event::End(_) => {
                path.pop();
            }
            Event::Eof => return Ok(None),
            _ => {}
        }
    }
}

fn emit(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<()> {
    writer
        .write_event(event)
        .map_err(|e| corrupt(format!("manifest write failed: {e}")))
}

/// Namespace prefix of an element name, e.g. `nu` for `<nu:metadata>`.
fn prefix_of(start: &BytesStart<'_>) -> Option<String> {
    start
        .name()
        .prefix()
        .map(|prefix| String::from_utf8_lossy(prefix.as_ref()).into_owned())
}

/// Open tag for a self-closing element, rebuilt from its name and attributes.
fn reopen(empty: &BytesStart<'_>) -> (BytesStart<'static>, String) {
    let name = String::from_utf8_lossy(empty.name().as_ref()).into_owned();
    let open = BytesStart::new(name.clone()).with_attributes(empty.attributes().flatten());
    (open, name)
}

/// Append every unapplied field, named in the namespace of the enclosing `metadata`.
fn append_missing(
    writer: &mut Writer<Vec<u8>>,
    prefix: Option<&str>,
    pending: &[(ManifestField, &str)],
    applied: &mut [bool],
) -> Result<()> {
    for (slot, (field, value)) in pending.iter().enumerate() {
        if applied[slot] {
            continue;
        }
        let name = match prefix {
            Some(prefix) => format!("{prefix}:{}", field.element_name()),
            None => field.element_name().to_string(),
        };
        emit(writer, Event::Start(BytesStart::new(name.as_str())))?;
        emit(writer, Event::Text(BytesText::new(value)))?;
        emit(writer, Event::End(BytesEnd::new(name.as_str())))?;
        applied[slot] = true;
    }
    Ok(())
}

/// Consume events up to and including the end tag of the element just opened.
fn skip_element<'a>(reader: &mut Reader<&'a [u8]>) -> Result<BytesEnd<'a>> {
    let mut depth = 0usize;
    loop {
        match reader
            .read_event()
            .map_err(|e| corrupt(format!("manifest XML error: {e}")))?
        {
            Event::Start(_) => depth += 1,
            Event::End(end) if depth == 0 => return Ok(end),
            Event::End(_) => depth -= 1,
            Event::Eof => return Err(corrupt("manifest ended inside an element")),
            _ => {}
        }
    }
}

fn collect_text(reader: &mut Reader<&[u8]>) -> Result<String> {
    let mut value = String::new();
    let mut depth = 0usize;
    loop {
        match reader
            .read_event()
            .map_err(|e| corrupt(format!("manifest XML error: {e}")))?
        {
            Event::Text(text) if depth == 0 => {
                let unescaped = text
                    .unescape()
                    .map_err(|e| corrupt(format!("manifest XML error: {e}")))?;
                value.push_str(&unescaped);
            }
            Event::CData(data) if depth == 0 => {
                value.push_str(&String::from_utf8_lossy(&data));
            }
            Event::Start(_) => depth += 1,
            Event::End(_) if depth == 0 => return Ok(value),
            Event::End(_) => depth -= 1,
            Event::Eof => return Err(corrupt("manifest ended inside an element")),
            _ => {}
        }
    }
}

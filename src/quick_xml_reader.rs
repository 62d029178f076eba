use crate::{
    osm_data::{Record, RecordId},
    InvalidFormatSnafu, ParseFloatSnafu, ParseIntSnafu, Result,
};
use quick_xml::{
    events::{BytesStart, Event},
    name::QName,
    Reader,
};
use snafu::prelude::*;
use std::{io::BufRead, path::Path};

const BUFFER_SIZE: usize = 64 * 1024; // 64KiB

/// Calls `scanner` for every `<node>` in the OSM XML file at `path` that has a name.
///
/// Each record gets the node's id, the value of its `name` tag, and `[lat, lon]`
/// as coordinates. Scanning stops at the first error returned by `scanner`.
pub fn scan_records<P, F, T>(path: P, scanner: F, initial: T) -> Result<T>
where
    P: AsRef<Path>,
    F: FnMut(Record, T) -> Result<T>,
{
    let parser = Reader::from_file(path)?;
    scan(parser, scanner, initial)
}

/// Same as [`scan_records`], but reads the XML from `reader`
pub fn scan_records_from_reader<R, F, T>(reader: R, scanner: F, initial: T) -> Result<T>
where
    R: BufRead,
    F: FnMut(Record, T) -> Result<T>,
{
    scan(Reader::from_reader(reader), scanner, initial)
}

fn scan<R, F, T>(mut parser: Reader<R>, mut scanner: F, initial: T) -> Result<T>
where
    R: BufRead,
    F: FnMut(Record, T) -> Result<T>,
{
    parser.trim_text(true);
    let mut buffer: Vec<u8> = Vec::with_capacity(BUFFER_SIZE);
    let mut inner_buffer: Vec<u8> = Vec::with_capacity(BUFFER_SIZE);

    let mut acc = initial;
    loop {
        match parser.read_event_into(&mut buffer)? {
            Event::Start(e) => match e.name().as_ref() {
                b"osm" => (),
                b"node" => {
                    if let Some(record) = read_node(&mut parser, &e, &mut inner_buffer, false)? {
                        acc = scanner(record, acc)?;
                    }
                }
                _ => {
                    // bounds, way, relation, note, meta, ...
                    let end = e.name().as_ref().to_vec();
                    parser.read_to_end_into(QName(&end), &mut inner_buffer)?;
                }
            },
            Event::Empty(e) => {
                if e.name().as_ref() == b"node" {
                    if let Some(record) = read_node(&mut parser, &e, &mut inner_buffer, true)? {
                        acc = scanner(record, acc)?;
                    }
                }
            }
            Event::Eof => return Ok(acc),
            _ => (), // declarations, comments, the closing osm tag
        }
        buffer.clear();
        inner_buffer.clear();
    }
}

fn read_node<R: BufRead>(
    parser: &mut Reader<R>,
    event: &BytesStart<'_>,
    buffer: &mut Vec<u8>,
    skip_content: bool,
) -> Result<Option<Record>> {
    let mut id: Option<RecordId> = None;
    let mut lat: Option<f64> = None;
    let mut lon: Option<f64> = None;
    for a_res in event.attributes() {
        let a = a_res.map_err(quick_xml::Error::from)?;
        match a.key.as_ref() {
            b"id" => {
                let value = a.decode_and_unescape_value(parser)?;
                id = Some(value.parse().context(ParseIntSnafu {
                    value: &*value,
                })?);
            }
            b"lat" => {
                let value = a.decode_and_unescape_value(parser)?;
                lat = Some(value.parse().context(ParseFloatSnafu {
                    value: &*value,
                })?);
            }
            b"lon" => {
                let value = a.decode_and_unescape_value(parser)?;
                lon = Some(value.parse().context(ParseFloatSnafu {
                    value: &*value,
                })?);
            }
            _ => (), // ignore other fields
        }
    }
    let (Some(id), Some(lat), Some(lon)) = (id, lat, lon) else {
        return InvalidFormatSnafu {
            description: "node is missing one of id, lat, or lon".to_string(),
        }
        .fail();
    };
    if skip_content {
        // no tags, so no name
        return Ok(None);
    }

    let mut name: Option<String> = None;
    loop {
        match parser.read_event_into(buffer)? {
            Event::Empty(e) => {
                if e.name().as_ref() == b"tag" {
                    if let Some((key, value)) = read_tag(parser, &e)? {
                        if key == "name" {
                            name = Some(value);
                        }
                    }
                }
            }
            Event::End(e) => {
                if e.name().as_ref() == b"node" {
                    break;
                }
            }
            Event::Eof => {
                return InvalidFormatSnafu {
                    description: format!("file ended inside node {id}"),
                }
                .fail();
            }
            _ => (),
        }
        buffer.clear();
    }
    Ok(name.map(|name| Record::new(id, name, vec![lat, lon])))
}

fn read_tag<R: BufRead>(
    parser: &Reader<R>,
    event: &BytesStart<'_>,
) -> Result<Option<(String, String)>> {
    let mut key: Option<String> = None;
    let mut value: Option<String> = None;
    for a_res in event.attributes() {
        let a = a_res.map_err(quick_xml::Error::from)?;
        match a.key.as_ref() {
            b"k" => key = Some(a.decode_and_unescape_value(parser)?.into_owned()),
            b"v" => value = Some(a.decode_and_unescape_value(parser)?.into_owned()),
            _ => (), // ignore other fields
        }
    }
    Ok(key.zip(value))
}

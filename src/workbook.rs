//! Minimal xlsx workbook writer (and reader, for checking output).
//!
//! Each [`Sheet`] is a list of ordered field maps; the header row is the
//! union of their keys in first-seen order. Cells are written as inline
//! strings so no shared-string table is needed. Sheets without rows are
//! still written, with an empty grid.

use std::fs::File;
use std::io::{Read, Seek, Write};
use std::path::Path;

use quick_xml::escape::escape;
use quick_xml::events::Event;
use zip::write::SimpleFileOptions;

use crate::models::FieldMap;

/// Maximum decompressed bytes read from a single ZIP entry.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum WorkbookError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("XML error in {entry}: {message}")]
    Xml { entry: String, message: String },
    #[error("ZIP entry {0} exceeds size limit")]
    TooLarge(String),
}

#[derive(Debug, Clone)]
pub struct Sheet {
    pub name: String,
    pub rows: Vec<FieldMap>,
}

impl Sheet {
    pub fn new(name: impl Into<String>, rows: Vec<FieldMap>) -> Self {
        Self {
            name: name.into(),
            rows,
        }
    }

    /// Union of row keys, first-seen order.
    pub fn header(&self) -> Vec<&str> {
        let mut header: Vec<&str> = Vec::new();
        for row in &self.rows {
            for key in row.keys() {
                if !header.contains(&key.as_str()) {
                    header.push(key);
                }
            }
        }
        header
    }
}

/// Spreadsheet column letters: 0 → A, 25 → Z, 26 → AA.
fn column_name(mut index: usize) -> String {
    let mut name = Vec::new();
    loop {
        name.push(b'A' + (index % 26) as u8);
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    name.reverse();
    String::from_utf8_lossy(&name).into_owned()
}

/// XML 1.0 forbids C0 control characters other than tab, LF and CR.
fn is_xml_char(c: char) -> bool {
    !matches!(c, '\u{0}'..='\u{8}' | '\u{b}' | '\u{c}' | '\u{e}'..='\u{1f}')
}

fn push_row(xml: &mut String, row_number: usize, values: &[&str]) {
    xml.push_str(&format!("<row r=\"{}\">", row_number));
    for (col, value) in values.iter().enumerate() {
        let value: String = value.chars().filter(|&c| is_xml_char(c)).collect();
        if value.is_empty() {
            continue;
        }
        xml.push_str(&format!(
            "<c r=\"{}{}\" t=\"inlineStr\"><is><t xml:space=\"preserve\">{}</t></is></c>",
            column_name(col),
            row_number,
            escape(value.as_str())
        ));
    }
    xml.push_str("</row>");
}

fn sheet_xml(sheet: &Sheet) -> String {
    let header = sheet.header();
    let mut xml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>"#,
    );
    if !header.is_empty() {
        push_row(&mut xml, 1, &header);
    }
    for (i, row) in sheet.rows.iter().enumerate() {
        let values: Vec<&str> = header
            .iter()
            .map(|key| row.get(*key).map(String::as_str).unwrap_or(""))
            .collect();
        push_row(&mut xml, i + 2, &values);
    }
    xml.push_str("</sheetData></worksheet>");
    xml
}

fn content_types_xml(sheet_count: usize) -> String {
    let mut xml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/>"#,
    );
    for n in 1..=sheet_count {
        xml.push_str(&format!(
            r#"<Override PartName="/xl/worksheets/sheet{}.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/>"#,
            n
        ));
    }
    xml.push_str("</Types>");
    xml
}

const ROOT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#;

fn workbook_xml(sheets: &[Sheet]) -> String {
    let mut xml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets>"#,
    );
    for (i, sheet) in sheets.iter().enumerate() {
        xml.push_str(&format!(
            r#"<sheet name="{}" sheetId="{}" r:id="rId{}"/>"#,
            escape(sheet.name.as_str()),
            i + 1,
            i + 1
        ));
    }
    xml.push_str("</sheets></workbook>");
    xml
}

fn workbook_rels_xml(sheet_count: usize) -> String {
    let mut xml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#,
    );
    for n in 1..=sheet_count {
        xml.push_str(&format!(
            r#"<Relationship Id="rId{n}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet{n}.xml"/>"#
        ));
    }
    xml.push_str("</Relationships>");
    xml
}

/// Write `sheets`, in order, to a new workbook at `path`.
pub fn write_workbook(path: &Path, sheets: &[Sheet]) -> Result<(), WorkbookError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut zip = zip::ZipWriter::new(File::create(path)?);
    let options =
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    zip.start_file("[Content_Types].xml", options)?;
    zip.write_all(content_types_xml(sheets.len()).as_bytes())?;
    zip.start_file("_rels/.rels", options)?;
    zip.write_all(ROOT_RELS.as_bytes())?;
    zip.start_file("xl/workbook.xml", options)?;
    zip.write_all(workbook_xml(sheets).as_bytes())?;
    zip.start_file("xl/_rels/workbook.xml.rels", options)?;
    zip.write_all(workbook_rels_xml(sheets.len()).as_bytes())?;

    for (i, sheet) in sheets.iter().enumerate() {
        zip.start_file(format!("xl/worksheets/sheet{}.xml", i + 1), options)?;
        zip.write_all(sheet_xml(sheet).as_bytes())?;
    }

    zip.finish()?;
    Ok(())
}

fn read_zip_entry_bounded<R: Read + Seek>(
    archive: &mut zip::ZipArchive<R>,
    name: &str,
) -> Result<Vec<u8>, WorkbookError> {
    let entry = archive.by_name(name)?;
    let mut out = Vec::new();
    entry.take(MAX_XML_ENTRY_BYTES).read_to_end(&mut out)?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(WorkbookError::TooLarge(name.to_string()));
    }
    Ok(out)
}

fn xml_error(entry: &str, e: impl std::fmt::Display) -> WorkbookError {
    WorkbookError::Xml {
        entry: entry.to_string(),
        message: e.to_string(),
    }
}

fn read_sheet_names(xml: &[u8]) -> Result<Vec<String>, WorkbookError> {
    let mut names = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Empty(e)) | Ok(Event::Start(e)) if e.local_name().as_ref() == b"sheet" => {
                for attr in e.attributes().flatten() {
                    if attr.key.as_ref() == b"name" {
                        let value = attr
                            .unescape_value()
                            .map_err(|e| xml_error("xl/workbook.xml", e))?;
                        names.push(value.into_owned());
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error("xl/workbook.xml", e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(names)
}

/// Cell index from a reference such as `AB12`.
fn column_index(reference: &str) -> usize {
    reference
        .bytes()
        .take_while(u8::is_ascii_uppercase)
        .fold(0usize, |acc, b| acc * 26 + (b - b'A' + 1) as usize)
        .saturating_sub(1)
}

fn read_sheet_rows(entry: &str, xml: &[u8]) -> Result<Vec<Vec<String>>, WorkbookError> {
    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut column = 0usize;
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"row" => rows.push(Vec::new()),
                b"c" => {
                    column = e
                        .attributes()
                        .flatten()
                        .find(|a| a.key.as_ref() == b"r")
                        .map(|a| column_index(&String::from_utf8_lossy(&a.value)))
                        .unwrap_or(0);
                }
                b"t" => in_t = true,
                _ => {}
            },
            Ok(Event::Text(te)) if in_t => {
                let value = te.unescape().map_err(|e| xml_error(entry, e))?;
                if let Some(row) = rows.last_mut() {
                    if row.len() <= column {
                        row.resize(column + 1, String::new());
                    }
                    row[column].push_str(&value);
                }
            }
            Ok(Event::End(e)) if e.local_name().as_ref() == b"t" => in_t = false,
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(entry, e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(rows)
}

/// Sheet names with their rows (header first), in workbook order.
pub fn read_workbook(path: &Path) -> Result<Vec<(String, Vec<Vec<String>>)>, WorkbookError> {
    let mut archive = zip::ZipArchive::new(File::open(path)?)?;
    let names = read_sheet_names(&read_zip_entry_bounded(&mut archive, "xl/workbook.xml")?)?;

    let mut sheets = Vec::with_capacity(names.len());
    for (i, name) in names.into_iter().enumerate() {
        let entry = format!("xl/worksheets/sheet{}.xml", i + 1);
        let xml = read_zip_entry_bounded(&mut archive, &entry)?;
        sheets.push((name, read_sheet_rows(&entry, &xml)?));
    }
    Ok(sheets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn row(pairs: &[(&str, &str)]) -> FieldMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn column_names() {
        assert_eq!(column_name(0), "A");
        assert_eq!(column_name(25), "Z");
        assert_eq!(column_name(26), "AA");
        assert_eq!(column_name(27), "AB");
        assert_eq!(column_index("AB12"), 27);
    }

    #[test]
    fn control_characters_are_dropped_from_cells() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("out.xlsx");
        let sheet = Sheet::new(
            "Resultados",
            vec![row(&[
                ("Importe", "1.000\u{1}\u{b} €"),
                ("Nota", "línea 1\nlínea 2\tfin"),
                ("Vacío", "\u{0}\u{1f}"),
            ])],
        );

        write_workbook(&path, &[sheet]).unwrap();
        let sheets = read_workbook(&path).unwrap();
        let rows = &sheets[0].1;
        assert_eq!(rows[0], vec!["Importe", "Nota", "Vacío"]);
        assert_eq!(rows[1][0], "1.000 €");
        assert_eq!(rows[1][1], "línea 1\nlínea 2\tfin");
        assert!(rows[1].get(2).map_or(true, |v| v.is_empty()));
    }

    #[test]
    fn header_is_union_in_first_seen_order() {
        let sheet = Sheet::new(
            "Resultados",
            vec![
                row(&[("Identificador", "1"), ("Mod 1/Importe", "5")]),
                row(&[("Identificador", "2"), ("Fecha Anuncio", "x"), ("Mod 1/Importe", "6")]),
            ],
        );
        assert_eq!(sheet.header(), vec!["Identificador", "Mod 1/Importe", "Fecha Anuncio"]);
    }

    #[test]
    fn writes_sheets_in_order_including_empty_ones() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("out").join("book.xlsx");
        let sheets = vec![
            Sheet::new(
                "Resultados",
                vec![
                    row(&[("Identificador", "A&B <1>"), ("Modificado", "Sí")]),
                    row(&[("Identificador", "2"), ("Fecha Anuncio", "01/01/2024")]),
                ],
            ),
            Sheet::new("Modificacion", vec![]),
            Sheet::new("Adjudicacion", vec![]),
        ];
        write_workbook(&path, &sheets).unwrap();

        let read = read_workbook(&path).unwrap();
        let names: Vec<&str> = read.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["Resultados", "Modificacion", "Adjudicacion"]);

        let rows = &read[0].1;
        assert_eq!(rows[0], vec!["Identificador", "Modificado", "Fecha Anuncio"]);
        assert_eq!(rows[1], vec!["A&B <1>", "Sí"]);
        assert_eq!(rows[2], vec!["2", "", "01/01/2024"]);
        assert!(read[1].1.is_empty());
    }
}

use anyhow::Context;
use std::io::{Cursor, Write};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

/// A single-sheet workbook serialized as a minimal .xlsx package.
///
/// Every cell is an inline string, which keeps the package to four fixed
/// parts (content types, package rels, workbook + rels, one worksheet) and
/// avoids a shared-strings table. Spreadsheet apps open these fine.
#[derive(Debug, Clone)]
pub struct Workbook {
    sheet_name: String,
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Workbook {
    pub fn new(sheet_name: &str, columns: &[&str]) -> Self {
        Workbook {
            sheet_name: sheet_name.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }

    /// Data rows only; the header row is not counted.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn to_bytes(&self) -> anyhow::Result<Vec<u8>> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

        zip.start_file("[Content_Types].xml", opts)
            .context("failed to start content types entry")?;
        zip.write_all(CONTENT_TYPES_XML.as_bytes())
            .context("failed to write content types entry")?;

        zip.start_file("_rels/.rels", opts)
            .context("failed to start package rels entry")?;
        zip.write_all(PACKAGE_RELS_XML.as_bytes())
            .context("failed to write package rels entry")?;

        zip.start_file("xl/workbook.xml", opts)
            .context("failed to start workbook entry")?;
        zip.write_all(self.workbook_xml().as_bytes())
            .context("failed to write workbook entry")?;

        zip.start_file("xl/_rels/workbook.xml.rels", opts)
            .context("failed to start workbook rels entry")?;
        zip.write_all(WORKBOOK_RELS_XML.as_bytes())
            .context("failed to write workbook rels entry")?;

        zip.start_file("xl/worksheets/sheet1.xml", opts)
            .context("failed to start worksheet entry")?;
        zip.write_all(self.worksheet_xml().as_bytes())
            .context("failed to write worksheet entry")?;

        let cursor = zip.finish().context("failed to finalize workbook package")?;
        Ok(cursor.into_inner())
    }

    fn workbook_xml(&self) -> String {
        format!(
            concat!(
                "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>",
                "<workbook xmlns=\"http://schemas.openxmlformats.org/spreadsheetml/2006/main\" ",
                "xmlns:r=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships\">",
                "<sheets><sheet name=\"{}\" sheetId=\"1\" r:id=\"rId1\"/></sheets>",
                "</workbook>"
            ),
            xml_escape(&self.sheet_name)
        )
    }

    fn worksheet_xml(&self) -> String {
        let mut xml = String::with_capacity(256 + 64 * self.rows.len() * self.columns.len());
        xml.push_str(concat!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>",
            "<worksheet xmlns=\"http://schemas.openxmlformats.org/spreadsheetml/2006/main\">",
            "<sheetData>"
        ));
        push_row_xml(&mut xml, 1, self.columns.iter());
        for (i, row) in self.rows.iter().enumerate() {
            push_row_xml(&mut xml, i + 2, row.iter());
        }
        xml.push_str("</sheetData></worksheet>");
        xml
    }
}

fn push_row_xml<'a>(xml: &mut String, row_no: usize, cells: impl Iterator<Item = &'a String>) {
    xml.push_str(&format!("<row r=\"{}\">", row_no));
    for cell in cells {
        xml.push_str("<c t=\"inlineStr\"><is><t xml:space=\"preserve\">");
        xml.push_str(&xml_escape(cell));
        xml.push_str("</t></is></c>");
    }
    xml.push_str("</row>");
}

fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(ch),
        }
    }
    out
}

const CONTENT_TYPES_XML: &str = concat!(
    "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>",
    "<Types xmlns=\"http://schemas.openxmlformats.org/package/2006/content-types\">",
    "<Default Extension=\"rels\" ContentType=\"application/vnd.openxmlformats-package.relationships+xml\"/>",
    "<Default Extension=\"xml\" ContentType=\"application/xml\"/>",
    "<Override PartName=\"/xl/workbook.xml\" ContentType=\"application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml\"/>",
    "<Override PartName=\"/xl/worksheets/sheet1.xml\" ContentType=\"application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml\"/>",
    "</Types>"
);

const PACKAGE_RELS_XML: &str = concat!(
    "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>",
    "<Relationships xmlns=\"http://schemas.openxmlformats.org/package/2006/relationships\">",
    "<Relationship Id=\"rId1\" Type=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument\" Target=\"xl/workbook.xml\"/>",
    "</Relationships>"
);

const WORKBOOK_RELS_XML: &str = concat!(
    "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>",
    "<Relationships xmlns=\"http://schemas.openxmlformats.org/package/2006/relationships\">",
    "<Relationship Id=\"rId1\" Type=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet\" Target=\"worksheets/sheet1.xml\"/>",
    "</Relationships>"
);

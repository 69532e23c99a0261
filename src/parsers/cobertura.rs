/// Parser for Cobertura XML coverage reports.
///
/// Cobertura XML structure:
///   <coverage>
///     <sources><source>...</source></sources>
///     <packages>
///       <package name="...">
///         <classes>
///           <class name="..." filename="..." line-rate="..." branch-rate="...">
///             <methods>
///               <method name="..." ... line-rate="...">
///                 <lines><line number="..." hits="..." .../></lines>
///               </method>
///             </methods>
///             <lines>
///               <line number="..." hits="..." branch="true|false"
///                     condition-coverage="50% (1/2)" />
///             </lines>
///           </class>
///         </classes>
///       </package>
///     </packages>
///   </coverage>
///
/// Branch attributes are accepted but only line hits are recorded.
use std::collections::HashMap;
use std::str;

use quick_xml::events::Event;
use quick_xml::reader::Reader;

use crate::error::{GatherError, Result};
use crate::model::{CoverageRecord, FunctionCoverage};
use crate::parsers::{check_line, Parser};

pub struct CoberturaParser;

impl Parser for CoberturaParser {
    fn parse(&self, input: &[u8]) -> Result<Vec<CoverageRecord>> {
        parse_cobertura(input)
    }
}

/// Method being collected inside the current class.
struct OpenMethod {
    name: String,
    start_line: Option<u32>,
    end_line: Option<u32>,
    hit: u64,
}

fn parse_cobertura(input: &[u8]) -> Result<Vec<CoverageRecord>> {
    let mut reader = Reader::from_reader(input);
    reader.trim_text(true);

    let mut records = Vec::new();
    let mut buf = Vec::new();

    let mut saw_coverage = false;
    let mut current_file: Option<CoverageRecord> = None;
    let mut current_method: Option<OpenMethod> = None;

    // Source prefix from <source> elements
    let mut sources: Vec<String> = Vec::new();
    let mut in_source = false;

    loop {
        let event = reader.read_event_into(&mut buf);
        let is_start_event = matches!(&event, Ok(Event::Start(_)));
        match event {
            Err(source) => {
                return Err(GatherError::Xml {
                    source,
                    position: reader.buffer_position(),
                })
            }
            Ok(Event::Eof) => break,
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => {
                match e.name().as_ref() {
                    b"coverage" => saw_coverage = true,
                    b"source" => {
                        // A self-closing <source/> has no text and no End
                        // event; flagging it would capture unrelated text.
                        if is_start_event {
                            in_source = true;
                        }
                    }
                    b"class" => {
                        let attrs = attr_map(e);
                        if let Some(file) = current_file.take() {
                            records.push(file);
                        }
                        current_file = attrs
                            .get("filename")
                            .map(|f| CoverageRecord::new(resolve_source_path(f, &sources)));
                    }
                    b"method" if is_start_event => {
                        let attrs = attr_map(e);
                        current_method = attrs.get("name").map(|name| OpenMethod {
                            name: name.clone(),
                            start_line: None,
                            end_line: None,
                            hit: 0,
                        });
                    }
                    b"line" => {
                        let attrs = attr_map(e);
                        let number = attrs.get("number").and_then(|n| n.parse::<u32>().ok());
                        if let Some(line) = number {
                            check_line(line, 0)?;
                        }
                        let hits = attrs.get("hits").and_then(|h| h.parse::<u64>().ok());
                        if let (Some(file), Some(line), Some(hits)) =
                            (current_file.as_mut(), number, hits)
                        {
                            // Lines may appear both under <method><lines> and
                            // <class><lines>; keep the max hit count.
                            if line > 0 {
                                let entry = file.lines.entry(line).or_insert(hits);
                                *entry = (*entry).max(hits);

                                if let Some(method) = current_method.as_mut() {
                                    method.start_line =
                                        Some(method.start_line.map_or(line, |s| s.min(line)));
                                    method.end_line =
                                        Some(method.end_line.map_or(line, |s| s.max(line)));
                                    method.hit = method.hit.max(hits);
                                }
                            }
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Text(ref e)) => {
                if in_source {
                    if let Ok(text) = e.unescape() {
                        sources.push(text.to_string());
                    }
                    in_source = false;
                }
            }
            Ok(Event::End(ref e)) => match e.name().as_ref() {
                b"source" => in_source = false,
                b"class" => {
                    if let Some(file) = current_file.take() {
                        records.push(file);
                    }
                }
                b"method" => {
                    if let (Some(file), Some(method)) =
                        (current_file.as_mut(), current_method.take())
                    {
                        file.functions.push(FunctionCoverage {
                            name: method.name,
                            start_line: method.start_line,
                            end_line: method.end_line,
                            hit_count: method.hit,
                        });
                    }
                }
                _ => {}
            },
            _ => {}
        }
        buf.clear();
    }

    if !saw_coverage {
        return Err(GatherError::parse(0, "no <coverage> element; not a Cobertura report"));
    }

    // Handle unclosed file
    if let Some(file) = current_file.take() {
        records.push(file);
    }

    Ok(records)
}

/// Resolve a filename against the list of `<source>` prefixes.
///
/// - If the filename is already absolute, return it as-is.
/// - Otherwise, prepend the first non-empty source prefix.
/// - If no non-empty sources exist, return the filename unchanged.
fn resolve_source_path(filename: &str, sources: &[String]) -> String {
    if crate::paths::is_absolute(&filename.replace('\\', "/")) {
        return filename.to_string();
    }
    for source in sources {
        let base = source.trim().trim_end_matches(['/', '\\']);
        if !base.is_empty() {
            return format!("{}/{}", base, filename);
        }
    }
    filename.to_string()
}

/// Extract attributes from an XML element into a HashMap.
fn attr_map(e: &quick_xml::events::BytesStart) -> HashMap<String, String> {
    e.attributes()
        .filter_map(|a| {
            let attr = a.ok()?;
            let key = str::from_utf8(attr.key.local_name().into_inner())
                .ok()?
                .to_string();
            let value = attr.unescape_value().ok()?.to_string();
            Some((key, value))
        })
        .collect()
}

mod common;

use common::{source_text, Project};
use coveralls_gather::cli::{self, ReportOptions};
use coveralls_gather::detect::Format;
use coveralls_gather::parsers::gcov::GcovParser;
use coveralls_gather::parsers::Parser;

const BRANCHES: &str = include_str!("fixtures/branches.c.gcov");

#[test]
fn parse_branch_output() {
    let records = GcovParser.parse(BRANCHES.as_bytes()).unwrap();
    assert_eq!(records.len(), 1);

    let record = &records[0];
    assert_eq!(record.path, "../src/branches.c");
    assert_eq!(record.line_count, Some(16));
    assert_eq!(
        record.lines.keys().copied().collect::<Vec<_>>(),
        vec![3, 5, 6, 7, 8, 9, 12, 14, 15]
    );
    assert_eq!(record.lines[&8], 0);
    assert_eq!(record.lines[&5], 4);

    let functions: Vec<(&str, Option<u32>, u64)> = record
        .functions
        .iter()
        .map(|f| (f.name.as_str(), f.start_line, f.hit_count))
        .collect();
    assert_eq!(
        functions,
        vec![("classify", Some(3), 4), ("main", Some(12), 2)]
    );
}

#[test]
fn functions_reach_the_report() {
    let project = Project::new();
    project.write("src/branches.c", &source_text(16));
    project.write("build/coveralls/branches.c.gcov", BRANCHES);

    let config = project.config(Format::Gcov, &["src"]);
    let outcome = cli::cmd_gather(&config, &ReportOptions::default(), None).unwrap();
    assert!(outcome.output.contains("-- Function coverage:  2/2 (100%)"), "{}", outcome.output);

    let json = project.read_json(&config.output);
    let functions = json["source_files"][0]["functions"].as_array().unwrap();
    assert_eq!(functions.len(), 2);
    assert_eq!(functions[0]["name"], "classify");
    assert_eq!(functions[0]["count"], 4);
    assert_eq!(functions[0]["start_line"], 3);
    assert_eq!(functions[1]["name"], "main");
}

use ccrf_core::archive::TfidfArchive;
use ccrf_core::matrix::{assemble, DuplicatePolicy, TfIdfEntry};
use ccrf_core::{IdIndex, PipelineError};
use flate2::write::GzEncoder;
use flate2::Compression;

fn archive_bytes(docs: &[(&str, &str)]) -> Vec<u8> {
    let gz = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(gz);
    for (docid, body) in docs {
        let content = format!("<DOCNO>{docid}</DOCNO>\n{body}");
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, docid, content.as_bytes()).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

#[test]
fn streams_documents_and_weights_in_order() {
    let bytes = archive_bytes(&[
        ("FT911-1", "tariff 3.218876\nimport 1.609438"),
        ("FT911-2", "export 0.500000\n"),
        ("FT911-3", ""),
    ]);
    let mut archive = TfidfArchive::from_reader("mem", bytes.as_slice());
    let mut docs = archive.documents().unwrap();

    assert!(docs.has_next_document().unwrap());
    assert_eq!(docs.next_document_id(), Some("FT911-1"));
    assert_eq!(docs.next_weight().unwrap(), ("tariff".to_string(), 3.218876));
    assert!(docs.has_next_weight().unwrap());
    assert_eq!(docs.next_weight().unwrap(), ("import".to_string(), 1.609438));
    assert!(!docs.has_next_weight().unwrap());

    assert!(docs.has_next_document().unwrap());
    assert_eq!(docs.next_document_id(), Some("FT911-2"));
    assert_eq!(docs.next_weight().unwrap().0, "export");
    assert!(!docs.has_next_weight().unwrap());

    assert!(docs.has_next_document().unwrap());
    assert_eq!(docs.next_document_id(), Some("FT911-3"));
    assert!(!docs.has_next_weight().unwrap());

    assert!(!docs.has_next_document().unwrap());
    assert_eq!(docs.next_document_id(), None);
}

#[test]
fn skipped_documents_are_not_parsed() {
    let bytes = archive_bytes(&[("bad", "this line is malformed\n"), ("good", "term 1.0")]);
    let mut archive = TfidfArchive::from_reader("mem", bytes.as_slice());
    let mut docs = archive.documents().unwrap();

    assert!(docs.has_next_document().unwrap());
    docs.skip_document();
    assert!(!docs.has_next_weight().unwrap());

    assert!(docs.has_next_document().unwrap());
    assert_eq!(docs.next_document_id(), Some("good"));
    assert_eq!(docs.next_weight().unwrap(), ("term".to_string(), 1.0));
}

#[test]
fn moving_on_mid_document_discards_the_rest() {
    let bytes = archive_bytes(&[("a", "x 1\ny 2\nz 3"), ("b", "w 4")]);
    let mut archive = TfidfArchive::from_reader("mem", bytes.as_slice());
    let mut docs = archive.documents().unwrap();
    docs.has_next_document().unwrap();
    docs.next_weight().unwrap();
    assert!(docs.has_next_document().unwrap());
    assert_eq!(docs.next_document_id(), Some("b"));
    assert_eq!(docs.next_weight().unwrap(), ("w".to_string(), 4.0));
}

#[test]
fn malformed_weight_reports_document_and_line() {
    let bytes = archive_bytes(&[("LA0101-7", "alpha 1.0\nbeta notanumber\n")]);
    let mut archive = TfidfArchive::from_reader("mem", bytes.as_slice());
    let mut docs = archive.documents().unwrap();
    docs.has_next_document().unwrap();
    docs.next_weight().unwrap();
    match docs.next_weight().unwrap_err() {
        PipelineError::Parse { source_name, line, message } => {
            assert!(source_name.contains("LA0101-7"));
            assert_eq!(line, 3);
            assert!(message.contains("notanumber"));
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn nan_and_infinite_weights_are_rejected() {
    for bad in ["NaN", "inf", "-inf", "Infinity"] {
        let body = format!("ok 1.0\nfoo {bad}\n");
        let bytes = archive_bytes(&[("FR940104-0-00001", body.as_str())]);
        let mut archive = TfidfArchive::from_reader("mem", bytes.as_slice());
        let mut docs = archive.documents().unwrap();
        docs.has_next_document().unwrap();
        assert_eq!(docs.next_weight().unwrap().0, "ok");
        match docs.next_weight() {
            Err(PipelineError::Parse { line, message, .. }) => {
                assert_eq!(line, 3);
                assert!(message.contains(bad), "{message}");
            }
            other => panic!("{bad} accepted: {other:?}"),
        }
    }
}

#[test]
fn wrong_field_count_is_a_parse_error() {
    let bytes = archive_bytes(&[("d", "one two three\n")]);
    let mut archive = TfidfArchive::from_reader("mem", bytes.as_slice());
    let mut docs = archive.documents().unwrap();
    docs.has_next_document().unwrap();
    assert!(matches!(docs.next_weight(), Err(PipelineError::Parse { .. })));
}

#[test]
fn missing_docno_header_is_a_parse_error() {
    let gz = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(gz);
    let content = b"term 1.0\n";
    let mut header = tar::Header::new_gnu();
    header.set_size(content.len() as u64);
    header.set_cksum();
    builder.append_data(&mut header, "x", &content[..]).unwrap();
    let bytes = builder.into_inner().unwrap().finish().unwrap();

    let mut archive = TfidfArchive::from_reader("mem", bytes.as_slice());
    let mut docs = archive.documents().unwrap();
    assert!(matches!(docs.has_next_document(), Err(PipelineError::Parse { line: 1, .. })));
}

#[test]
fn archive_feeds_the_assembler() {
    let bytes = archive_bytes(&[("docA", "apple 3.0\nbanana 4.0"), ("docZ", "cherry 1.0"), ("docB", "banana 2.0")]);
    let mut rows = IdIndex::new();
    rows.get_or_insert("docA");
    rows.get_or_insert("docB");

    let mut vocab = IdIndex::new();
    let mut entries = Vec::new();
    let mut archive = TfidfArchive::from_reader("mem", bytes.as_slice());
    let mut docs = archive.documents().unwrap();
    while docs.has_next_document().unwrap() {
        let row = match docs.next_document_id().and_then(|id| rows.index_of(id)) {
            Some(row) => row,
            None => {
                docs.skip_document();
                continue;
            }
        };
        while docs.has_next_weight().unwrap() {
            let (term, weight) = docs.next_weight().unwrap();
            entries.push(TfIdfEntry { row, col: vocab.get_or_insert(&term), weight });
        }
    }
    assert_eq!(vocab.len(), 2);
    assert!(!vocab.contains("cherry"));

    let m = assemble(entries, rows.len(), vocab.len(), DuplicatePolicy::Reject).unwrap();
    assert!((m.row(0).get(0) - 0.6).abs() < 1e-6);
    assert!((m.row(0).get(1) - 0.8).abs() < 1e-6);
    assert!((m.row(1).get(1) - 1.0).abs() < 1e-6);
}

use ante::grammar::{write_records, Symbol, SymbolTable};
use ante::AnteError;
use std::io::Write;

fn atom(ch: char) -> Vec<u8> {
    write_records(&[Symbol::Atomic(ch)]).unwrap()
}

fn pair_record(left: u32, right: i32) -> Vec<u8> {
    let mut rec = vec![0u8];
    rec.extend_from_slice(&left.to_le_bytes());
    rec.extend_from_slice(&right.to_le_bytes());
    rec
}

fn is_malformed(data: &[u8]) -> bool {
    matches!(SymbolTable::from_bytes(data), Err(AnteError::MalformedTable(_)))
}

#[test]
fn empty_stream_has_only_terminator() {
    let table = SymbolTable::from_bytes(&[]).unwrap();
    assert_eq!(table.n_tokens(), 1);
    assert_eq!(table.terminator(), 0);
    assert!(table.encode("").is_empty());
}

#[test]
fn unknown_tag_rejected() {
    let mut data = atom('a');
    data.push(9);
    data.extend_from_slice(&[0u8; 8]);
    assert!(is_malformed(&data));
}

#[test]
fn truncated_record_rejected() {
    let mut data = atom('a');
    data.extend_from_slice(&[1, b'b', 0, 0]);
    assert!(is_malformed(&data));
}

#[test]
fn forward_reference_rejected() {
    let mut data = atom('a');
    data.extend(atom('b'));
    data.extend(pair_record(0, 2));
    assert!(is_malformed(&data));

    let mut self_ref = atom('a');
    self_ref.extend(pair_record(1, 0));
    assert!(is_malformed(&self_ref));
}

#[test]
fn negative_right_index_rejected() {
    let mut data = atom('a');
    data.extend(pair_record(0, -1));
    assert!(is_malformed(&data));
}

#[test]
fn atom_must_be_utf8() {
    let mut bad_utf8 = vec![1u8, 0xff];
    bad_utf8.extend_from_slice(&[0u8; 7]);
    assert!(is_malformed(&bad_utf8));

    let mut split_scalar = vec![1u8, 0xc3, 0xa9];
    split_scalar.extend_from_slice(&[0u8; 6]);
    assert!(is_malformed(&split_scalar));
}

#[test]
fn multi_character_atom_loads_and_decodes() {
    let mut data = atom('a');
    data.push(3);
    data.extend_from_slice("e\u{301}".as_bytes());
    data.extend_from_slice(&[0u8; 5]);
    data.extend(pair_record(1, 0));

    let table = SymbolTable::from_bytes(&data).unwrap();
    assert_eq!(table.n_tokens(), 4);
    assert_eq!(table.symbol(1), Some(&Symbol::Cluster("e\u{301}".into())));
    assert_eq!(table.decode(&[1]), "e\u{301}");
    assert_eq!(table.decode(&[2]), "e\u{301}a");
    assert_eq!(table.render(&[0, 2, 3]), "a/e\u{301}a/<EOF>");
}

#[test]
fn missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = SymbolTable::from_path(dir.path().join("absent.bin")).unwrap_err();
    assert!(matches!(err, AnteError::Io(_)));
}

#[test]
fn loads_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    let mut data = atom('x');
    data.extend(atom('y'));
    data.extend(pair_record(0, 1));
    file.write_all(&data).unwrap();
    let table = SymbolTable::from_path(file.path()).unwrap();
    assert_eq!(table.n_tokens(), 4);
    assert_eq!(table.encode("xyxy"), vec![2, 2]);
}

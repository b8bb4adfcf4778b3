use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::Result;
use flate2::Compression;
use flate2::write::GzEncoder;
use pretty_assertions::assert_eq;
use rstest::{fixture, rstest};
use tempfile::{TempDir, tempdir};

use fanns_core::{DnaVariant, Nucleotide, ProteinChange, Strand, encode_dna};
use fanns_store::{
    IdentifierKind, JournalMode, NewVariant, PlanOutcome, PredictorKind, QueryFilter, QueryRequest,
    RowSelector, ScoreStore, ScoredRow, StoreConfig, StoreError,
};

fn dna(chromosome: &str, strand: &str, position: u32, reference: &str, alternate: &str) -> DnaVariant {
    DnaVariant::parse(chromosome, strand, position, reference, alternate).unwrap()
}

fn filter(pairs: &[(&str, &str)]) -> QueryFilter {
    QueryFilter::from_pairs(pairs.iter().copied()).unwrap()
}

fn collect(store: &ScoreStore, request: &QueryRequest) -> Result<Vec<ScoredRow>> {
    Ok(store.select(request)?.collect::<Result<Vec<_>, _>>()?)
}

struct StoreDir {
    _dir: TempDir,
    path: PathBuf,
}

#[fixture]
fn store_dir() -> StoreDir {
    let dir = tempdir().unwrap();
    let path = dir.path().join("fanns.db");
    StoreDir { _dir: dir, path }
}

/// A store with `sift` and `pph2` and the TP53 hotspot from the scenario.
#[fixture]
fn scenario() -> ScoreStore {
    let mut store = ScoreStore::in_memory().unwrap();
    let mut tx = store.transaction().unwrap();
    tx.add_predictor_column("sift", PredictorKind::Source, &[]).unwrap();
    tx.add_predictor_column("pph2", PredictorKind::Source, &[]).unwrap();
    tx.insert(
        &NewVariant::new(dna("17", "+", 7577121, "G", "A"))
            .with_transcript("T1")
            .with_score("sift", 0.02),
    )
    .unwrap();
    tx.commit().unwrap();
    store
}

#[rstest]
fn test_partial_dna_filter_returns_single_row(scenario: ScoreStore) -> Result<()> {
    let request = QueryRequest::new(filter(&[("chr", "17"), ("pos", "7577121"), ("ref", "G")]))
        .predictors(&["sift"]);

    let rows = collect(&scenario, &request)?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].score("sift"), Some(0.02));
    assert_eq!(rows[0].dna, Some(dna("17", "+", 7577121, "G", "A")));
    assert_eq!(rows[0].transcript.as_deref(), Some("T1"));
    Ok(())
}

#[rstest]
fn test_partial_dna_filter_plans_eight_keys(scenario: ScoreStore) -> Result<()> {
    let request = QueryRequest::new(filter(&[("chr", "17"), ("pos", "7577121"), ("ref", "G")]));
    let PlanOutcome::Execute(plan) = scenario.plan(&request)? else {
        panic!("expected an executable plan");
    };

    let mut expected = Vec::new();
    for strand in Strand::ALL {
        for alternate in Nucleotide::ALL {
            expected.push(encode_dna("17".parse()?, strand, 7577121, Nucleotide::G, alternate)?);
        }
    }
    expected.sort_unstable();
    assert_eq!(plan.dna_codes(), Some(expected.as_slice()));
    Ok(())
}

#[rstest]
fn test_incomplete_filter(scenario: ScoreStore) {
    let request = QueryRequest::new(filter(&[("chr", "17"), ("ref", "G"), ("alt", "A")]));
    assert!(matches!(
        scenario.select(&request),
        Err(StoreError::IncompleteFilter { missing: "pos", .. })
    ));

    let request = QueryRequest::new(filter(&[("aa_ref", "R")]));
    assert!(matches!(
        scenario.plan(&request),
        Err(StoreError::IncompleteFilter { missing: "aa_pos", .. })
    ));
}

#[rstest]
fn test_duplicate_variant(mut scenario: ScoreStore) -> Result<()> {
    let variant = dna("17", "+", 7577121, "G", "A");
    let mut tx = scenario.transaction()?;
    match tx.insert(&NewVariant::new(variant).with_transcript("T1")) {
        Err(StoreError::DuplicateVariant { variant, transcript }) => {
            assert_eq!(variant, "17:+:7577121:G>A");
            assert_eq!(transcript, "T1");
        }
        other => panic!("unexpected result: {:?}", other),
    }
    tx.insert(&NewVariant::new(variant).with_transcript("T2"))?;
    tx.commit()?;

    assert_eq!(scenario.row_count()?, 2);
    Ok(())
}

#[rstest]
fn test_update_scores_by_filter(mut scenario: ScoreStore) -> Result<()> {
    let mut tx = scenario.transaction()?;
    for (position, pph2) in [(100, 0.1), (101, 0.2), (102, 0.3)] {
        tx.insert(
            &NewVariant::new(dna("7", "-", position, "C", "T"))
                .with_transcript("T7")
                .with_score("pph2", pph2),
        )?;
    }
    tx.insert(&NewVariant::new(dna("7", "-", 100, "C", "T")).with_transcript("T8"))?;

    let selector = RowSelector::Filter(filter(&[
        ("chr", "7"),
        ("pos", "100"),
        ("pos", "101"),
        ("pos", "102"),
        ("transcript", "T7"),
    ]));
    let scores = BTreeMap::from([("sift".to_string(), Some(0.5))]);
    assert_eq!(tx.update_scores(&selector, &scores)?, 3);
    tx.commit()?;

    let rows = collect(
        &scenario,
        &QueryRequest::new(filter(&[("transcript", "T7")])).predictors(&["sift", "pph2"]),
    )?;
    assert_eq!(rows.len(), 3);
    let pph2: Vec<Option<f64>> = rows.iter().map(|row| row.score("pph2")).collect();
    assert_eq!(pph2, vec![Some(0.1), Some(0.2), Some(0.3)]);
    assert!(rows.iter().all(|row| row.score("sift") == Some(0.5)));

    let untouched = collect(
        &scenario,
        &QueryRequest::new(filter(&[("transcript", "T8")])).predictors(&["sift"]),
    )?;
    assert_eq!(untouched[0].score("sift"), None);
    Ok(())
}

#[rstest]
fn test_update_scores_unknown_predictor(mut scenario: ScoreStore) -> Result<()> {
    let mut tx = scenario.transaction()?;
    let scores = BTreeMap::from([("revel".to_string(), Some(0.5))]);
    assert!(matches!(
        tx.update_scores(&RowSelector::Id(1), &scores),
        Err(StoreError::UnknownPredictor(id)) if id == "revel"
    ));
    Ok(())
}

#[rstest]
fn test_map_priority_resolution(mut scenario: ScoreStore) -> Result<()> {
    let mut tx = scenario.transaction()?;
    tx.insert(&NewVariant::new(dna("17", "+", 7577121, "G", "A")).with_transcript("T2"))?;
    tx.add_map("first", "Priority one", IdentifierKind::Transcript, 1)?;
    tx.add_map("second", "Priority two", IdentifierKind::Transcript, 2)?;
    tx.add_map_entry("second", "T2", "TP53")?;
    tx.commit()?;

    let request = QueryRequest::new(filter(&[("transcript", "TP53")]));
    let rows = collect(&scenario, &request)?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].transcript.as_deref(), Some("T2"));

    // once the higher priority map knows the name, the lower one is ignored
    let mut tx = scenario.transaction()?;
    tx.add_map_entry("first", "T1", "TP53")?;
    tx.commit()?;

    let rows = collect(&scenario, &request)?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].transcript.as_deref(), Some("T1"));
    Ok(())
}

#[rstest]
fn test_annotations_are_surfaced_per_map(mut scenario: ScoreStore) -> Result<()> {
    let mut tx = scenario.transaction()?;
    tx.add_map("symbol", "Gene symbol", IdentifierKind::Transcript, 1)?;
    tx.add_map("uniprot", "UniProt", IdentifierKind::Transcript, 0)?;
    tx.add_map_entry("symbol", "T1", "TP53")?;
    tx.add_map_entry("uniprot", "T1", "P04637")?;
    tx.add_map_entry("uniprot", "T1", "Q53GA5")?;
    tx.commit()?;

    let request = QueryRequest::default().maps(&["symbol", "uniprot"]);
    let rows = collect(&scenario, &request)?;
    assert_eq!(rows[0].annotation("symbol"), ["TP53".to_string()]);
    assert_eq!(
        rows[0].annotation("uniprot"),
        ["P04637".to_string(), "Q53GA5".to_string()]
    );
    Ok(())
}

#[rstest]
fn test_unresolvable_name_is_empty(scenario: ScoreStore) -> Result<()> {
    let request = QueryRequest::new(filter(&[("transcript", "BRCA2")]));
    assert_eq!(scenario.plan(&request)?, PlanOutcome::EmptyResult);
    assert_eq!(collect(&scenario, &request)?.len(), 0);
    Ok(())
}

#[rstest]
fn test_protein_coordinates(mut scenario: ScoreStore) -> Result<()> {
    let change = ProteinChange::parse(175, "R", "H")?;
    let mut tx = scenario.transaction()?;
    tx.insert(
        &NewVariant::new(dna("17", "-", 7578406, "C", "T"))
            .with_transcript("ENST00000269305")
            .with_protein("ENSP00000269305", change),
    )?;
    tx.commit()?;

    let rows = collect(
        &scenario,
        &QueryRequest::new(filter(&[("protein", "ENSP00000269305"), ("aa_pos", "175")])),
    )?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].protein_change, Some(change));
    assert_eq!(rows[0].transcript.as_deref(), Some("ENST00000269305"));
    Ok(())
}

#[rstest]
fn test_rows_sharing_a_protein_change(mut scenario: ScoreStore) -> Result<()> {
    // two codons of the same residue give the same substitution
    let change = ProteinChange::parse(175, "R", "H")?;
    let mut tx = scenario.transaction()?;
    for variant in [dna("17", "-", 7578406, "C", "T"), dna("17", "-", 7578407, "G", "A")] {
        tx.insert(
            &NewVariant::new(variant)
                .with_transcript("ENST00000269305")
                .with_protein("ENSP00000269305", change),
        )?;
    }
    tx.commit()?;

    let rows = collect(
        &scenario,
        &QueryRequest::new(filter(&[("protein", "ENSP00000269305"), ("aa_pos", "175")])),
    )?;
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|row| row.protein_change == Some(change)));
    assert_ne!(rows[0].dna_code, rows[1].dna_code);

    let rows = collect(&scenario, &QueryRequest::new(filter(&[("aa_pos", "175")])))?;
    assert_eq!(rows.len(), 2);
    Ok(())
}

/// Every position in `1..=count` on chromosome 7 with `count` above the
/// per-statement parameter limit once expanded over strand and bases.
fn position_filter(count: u32, transcript: Option<&str>) -> QueryFilter {
    let positions: Vec<String> = (1..=count).map(|position| position.to_string()).collect();
    let mut pairs = vec![("chr", "7")];
    pairs.extend(positions.iter().map(|position| ("pos", position.as_str())));
    if let Some(transcript) = transcript {
        pairs.push(("transcript", transcript));
    }
    filter(&pairs)
}

#[rstest]
#[case(1000)]
#[case(3)]
fn test_large_position_filter(#[case] page_size: usize) -> Result<()> {
    let config = StoreConfig {
        page_size,
        ..StoreConfig::default()
    };
    let mut store = ScoreStore::in_memory_with_config(config)?;
    let mut tx = store.transaction()?;
    tx.add_predictor_column("sift", PredictorKind::Source, &[])?;
    for position in [2, 17, 33, 48, 50] {
        tx.insert(&NewVariant::new(dna("7", "-", position, "C", "T")).with_transcript("T7"))?;
    }
    tx.insert(&NewVariant::new(dna("7", "+", 49, "A", "G")).with_transcript("T8"))?;
    tx.insert(&NewVariant::new(dna("7", "+", 51, "A", "G")).with_transcript("T7"))?;

    let selector = RowSelector::Filter(position_filter(50, Some("T7")));
    let scores = BTreeMap::from([("sift".to_string(), Some(0.25))]);
    assert_eq!(tx.update_scores(&selector, &scores)?, 5);
    tx.commit()?;

    let request = QueryRequest::new(position_filter(50, None)).predictors(&["sift"]);
    let rows = collect(&store, &request)?;
    let positions: Vec<u32> = rows
        .iter()
        .map(|row| row.dna.map_or(0, |variant| variant.position))
        .collect();
    assert_eq!(positions, vec![2, 17, 33, 48, 50, 49]);
    let ids: Vec<i64> = rows.iter().map(|row| row.id).collect();
    let mut sorted = ids.clone();
    sorted.sort_unstable();
    assert_eq!(ids, sorted);
    assert_eq!(
        rows.iter().filter(|row| row.score("sift") == Some(0.25)).count(),
        5
    );
    Ok(())
}

#[rstest]
fn test_statistics(mut scenario: ScoreStore) -> Result<()> {
    let mut tx = scenario.transaction()?;
    tx.insert(&NewVariant::new(dna("1", "+", 10, "A", "C")).with_score("sift", 0.8))?;
    tx.add_predictor_column("combined", PredictorKind::Derived, &["sift", "pph2"])?;
    tx.recompute_statistics(&[])?;
    tx.commit()?;

    let sift = scenario.predictors().get("sift").unwrap();
    assert_eq!(sift.stats.count, 2);
    assert_eq!(sift.stats.min, Some(0.02));
    assert_eq!(sift.stats.max, Some(0.8));
    assert_eq!(scenario.predictors().get("pph2").unwrap().stats.count, 0);
    assert_eq!(scenario.predictors().get("combined").unwrap().sources, vec!["sift", "pph2"]);
    Ok(())
}

#[rstest]
fn test_predictor_already_exists(mut scenario: ScoreStore) -> Result<()> {
    let mut tx = scenario.transaction()?;
    assert!(matches!(
        tx.add_predictor_column("sift", PredictorKind::Source, &[]),
        Err(StoreError::PredictorAlreadyExists(_))
    ));
    Ok(())
}

#[rstest]
fn test_drop_rolls_back_interned_names(mut scenario: ScoreStore) -> Result<()> {
    {
        let mut tx = scenario.transaction()?;
        tx.insert(&NewVariant::new(dna("2", "+", 20, "T", "A")).with_transcript("T_NEW"))?;
        tx.add_predictor_column("revel", PredictorKind::Source, &[])?;
        assert!(tx.identifiers().transcripts.lookup("T_NEW").is_some());
    }

    assert_eq!(scenario.row_count()?, 1);
    assert!(scenario.identifiers().transcripts.lookup("T_NEW").is_none());
    assert!(scenario.predictors().get("revel").is_none());

    let mut tx = scenario.transaction()?;
    tx.add_map("symbol", "Gene symbol", IdentifierKind::Transcript, 1)?;
    tx.rollback()?;
    assert!(scenario.maps().map("symbol").is_none());
    Ok(())
}

#[rstest]
fn test_indices_and_metadata(mut scenario: ScoreStore) -> Result<()> {
    assert!(!scenario.metadata()?.initialized);

    let mut tx = scenario.transaction()?;
    tx.drop_indices()?;
    tx.insert(&NewVariant::new(dna("3", "+", 30, "G", "C")).with_transcript("T1"))?;
    tx.create_indices()?;
    tx.set_initialized(true)?;
    tx.commit()?;

    let metadata = scenario.metadata()?;
    assert!(metadata.initialized);
    assert_eq!(metadata.version, "01");
    assert_eq!(scenario.row_count()?, 2);
    Ok(())
}

#[rstest]
fn test_reopen_keeps_data(store_dir: StoreDir) -> Result<()> {
    {
        let mut store = ScoreStore::create(&store_dir.path)?;
        let mut tx = store.transaction()?;
        tx.add_predictor_column("sift", PredictorKind::Source, &[])?;
        tx.insert(&NewVariant::new(dna("X", "+", 1000, "A", "G")).with_transcript("T1").with_score("sift", 0.4))?;
        tx.commit()?;
    }

    let store = ScoreStore::open(&store_dir.path)?;
    assert_eq!(store.row_count()?, 1);
    assert!(store.identifiers().transcripts.lookup("T1").is_some());
    let rows = collect(&store, &QueryRequest::new(filter(&[("chr", "chrX"), ("pos", "1000")])).predictors(&["sift"]))?;
    assert_eq!(rows[0].score("sift"), Some(0.4));
    Ok(())
}

#[rstest]
fn test_readers_never_see_uncommitted_rows(store_dir: StoreDir) -> Result<()> {
    let mut writer = ScoreStore::create(&store_dir.path)?;
    let mut tx = writer.transaction()?;
    tx.insert(&NewVariant::new(dna("1", "+", 1, "A", "C")).with_transcript("T1"))?;
    tx.commit()?;

    let reader = ScoreStore::open_read_only(&store_dir.path)?;
    assert!(reader.is_read_only());

    let mut tx = writer.transaction()?;
    tx.insert(&NewVariant::new(dna("1", "+", 2, "A", "C")).with_transcript("T2"))?;
    assert_eq!(tx.row_count()?, 2);
    assert_eq!(reader.row_count()?, 1);
    assert_eq!(collect(&reader, &QueryRequest::default())?.len(), 1);

    tx.commit()?;
    let rows = collect(&reader, &QueryRequest::new(filter(&[("transcript", "T2")])))?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].transcript.as_deref(), Some("T2"));
    Ok(())
}

#[rstest]
fn test_read_only_handle_rejects_writes(store_dir: StoreDir) -> Result<()> {
    let _writer = ScoreStore::create(&store_dir.path)?;
    let mut reader = ScoreStore::open_read_only(&store_dir.path)?;
    assert!(matches!(reader.transaction(), Err(StoreError::ReadOnly)));
    Ok(())
}

#[rstest]
fn test_open_errors(store_dir: StoreDir) -> Result<()> {
    assert!(matches!(
        ScoreStore::open(&store_dir.path),
        Err(StoreError::DatabaseNotFound(_))
    ));
    assert!(matches!(
        ScoreStore::open_read_only(&store_dir.path),
        Err(StoreError::DatabaseNotFound(_))
    ));

    File::create(&store_dir.path)?;
    assert!(matches!(
        ScoreStore::open_read_only(&store_dir.path),
        Err(StoreError::NotAStore(_))
    ));
    Ok(())
}

#[rstest]
fn test_incompatible_version(store_dir: StoreDir) -> Result<()> {
    drop(ScoreStore::create(&store_dir.path)?);
    let conn = rusqlite::Connection::open(&store_dir.path)?;
    conn.execute("UPDATE meta SET db_version = '00'", [])?;
    drop(conn);

    match ScoreStore::open(&store_dir.path) {
        Err(StoreError::IncompatibleVersion { found, required }) => {
            assert_eq!(found, "00");
            assert_eq!(required, "01");
        }
        other => panic!("unexpected result: {:?}", other.map(|_| ())),
    }
    Ok(())
}

#[rstest]
fn test_config_from_file(store_dir: StoreDir) -> Result<()> {
    let config = StoreConfig::try_from(Path::new("tests/data/store.toml"))?;
    assert_eq!(config.journal_mode, JournalMode::Delete);

    let store = ScoreStore::create_with_config(&store_dir.path, config)?;
    assert_eq!(store.config().page_size, 250);
    Ok(())
}

fn gzip_copy(source: &Path, target: &Path) -> Result<()> {
    let mut content = Vec::new();
    File::open(source)?.read_to_end(&mut content)?;
    let mut encoder = GzEncoder::new(File::create(target)?, Compression::default());
    encoder.write_all(&content)?;
    encoder.finish()?;
    Ok(())
}

#[rstest]
fn test_gzipped_and_plain_maps_load_identically(store_dir: StoreDir) -> Result<()> {
    let plain = PathBuf::from("tests/data/uniprot.tsv");
    let gzipped = store_dir.path.with_file_name("uniprot.tsv.gz");
    gzip_copy(&plain, &gzipped)?;

    let mut store = ScoreStore::create(&store_dir.path)?;
    let mut tx = store.transaction()?;
    tx.add_map("plain", "UniProt", IdentifierKind::Transcript, 1)?;
    tx.add_map("gzipped", "UniProt", IdentifierKind::Transcript, 2)?;
    assert_eq!(tx.load_map_tsv("plain", &plain, false)?, 4);
    assert_eq!(tx.load_map_tsv("gzipped", &gzipped, false)?, 4);
    tx.commit()?;

    let exported_plain = store_dir.path.with_file_name("plain.tsv");
    let exported_gzipped = store_dir.path.with_file_name("gzipped.tsv");
    store.write_map_tsv("plain", &exported_plain)?;
    store.write_map_tsv("gzipped", &exported_gzipped)?;
    assert_eq!(
        std::fs::read_to_string(&exported_plain)?,
        std::fs::read_to_string(&exported_gzipped)?
    );
    Ok(())
}

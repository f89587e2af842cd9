//! Definition files survive a save and reload unchanged in meaning.

use chrono::Duration;
use medsched_core::{build_default_reference, Constraint, MedicationFile, RuleFile};

#[test]
fn test_builtin_definitions_roundtrip_through_files() {
    let dir = tempfile::tempdir().unwrap();
    let reference = build_default_reference();

    let rules = RuleFile {
        constraints: reference.constraints().to_vec(),
    };
    let medications = MedicationFile {
        medications: reference.medications().to_vec(),
    };

    let rules_path = dir.path().join("rules.toml");
    let medications_path = dir.path().join("medications.toml");
    rules.save(&rules_path).unwrap();
    medications.save(&medications_path).unwrap();

    assert_eq!(RuleFile::load(&rules_path).unwrap(), rules);
    assert_eq!(MedicationFile::load(&medications_path).unwrap(), medications);
}

#[test]
fn test_hand_written_rules_normalise_on_save() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rules.toml");
    std::fs::write(
        &path,
        r#"
[[constraints]]
type = "min_gap"
drug = "metformin"
other = "glipizide"
min_gap = "1h30m"

[[constraints]]
type = "food_timing"
drug = "metformin"
requirement = "with_food"
buffer = "1440m"
description = "Take with a meal"
"#,
    )
    .unwrap();

    let loaded = RuleFile::load(&path).unwrap();
    loaded.save(&path).unwrap();
    let text = std::fs::read_to_string(&path).unwrap();

    assert!(text.contains("min_gap = \"90m\""));
    assert!(text.contains("buffer = \"1d\""));
    assert!(text.contains("other = \"glipizide\""));

    let reloaded = RuleFile::load(&path).unwrap();
    assert_eq!(reloaded, loaded);
    assert!(matches!(
        &reloaded.constraints[0],
        Constraint::MinGap { min_gap, .. } if *min_gap == Duration::minutes(90)
    ));
}

use std::path::PathBuf;

use confidant::memory::{
    EMPTY_MEMORY, FieldValue, ProfileError, ProfileField, ProfileStore, SCHEMA_VERSION, Snapshot,
    render,
};

fn tmp_dir(label: &str) -> PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_nanos();
    let path = std::env::temp_dir().join(format!("confidant-store-{label}-{nanos}"));
    std::fs::create_dir_all(&path).expect("create temp dir");
    path
}

fn read_json(path: &std::path::Path) -> serde_json::Value {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

#[test]
fn missing_file_loads_empty_without_warning() {
    let dir = tmp_dir("missing");
    let store = ProfileStore::load(dir.join("memory.json"));
    assert!(store.snapshot().is_empty());
    assert!(store.load_warning().is_none());
    assert_eq!(store.snapshot().schema_version, SCHEMA_VERSION);
    assert_eq!(render(store.snapshot(), 10), EMPTY_MEMORY);
    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn corrupt_file_loads_empty_with_warning() {
    let dir = tmp_dir("corrupt");
    let path = dir.join("memory.json");
    std::fs::write(&path, "{ this is not json").unwrap();

    let store = ProfileStore::load(&path);
    assert!(store.snapshot().is_empty());
    let warning = store.load_warning().expect("warning recorded");
    assert!(warning.contains("memory.json"), "{warning}");
    // The broken file is left for the user to inspect.
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "{ this is not json");
    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn newer_schema_version_is_treated_as_unreadable() {
    let dir = tmp_dir("future");
    let path = dir.join("memory.json");
    std::fs::write(&path, r#"{"schemaVersion": 99, "facts": []}"#).unwrap();

    let store = ProfileStore::load(&path);
    assert!(store.snapshot().is_empty());
    assert!(store.load_warning().is_some());
    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn mutations_persist_across_reload() {
    let dir = tmp_dir("persist");
    let path = dir.join("memory.json");

    let mut store = ProfileStore::load(&path);
    store.add_fact("Любит джаз", None).unwrap();
    store.add_fact("Пишет на Rust", Some("работа")).unwrap();
    store.set_profile_field("имя", "Вася").unwrap();
    store.set_profile_field("age", "30").unwrap();
    store.add_interest("музыка").unwrap();
    store.add_goal("выучить испанский").unwrap();
    store.add_habit("бегает по утрам").unwrap();
    store.set_preference("кофе", "без сахара").unwrap();
    store
        .add_relationship("Маша", "сестра", "живёт в Казани")
        .unwrap();
    store
        .add_important_date("день рождения", "12 мая", "")
        .unwrap();

    let reloaded = ProfileStore::load(&path);
    let snapshot = reloaded.snapshot();
    assert!(reloaded.load_warning().is_none());
    assert_eq!(snapshot.facts.len(), 2);
    assert_eq!(snapshot.facts[0].text, "Любит джаз");
    assert_eq!(snapshot.facts[0].category, "general");
    assert_eq!(snapshot.facts[1].category, "работа");
    assert_eq!(snapshot.facts[0].session, reloaded.session());
    assert_eq!(snapshot.user_profile.name.as_deref(), Some("Вася"));
    assert_eq!(snapshot.user_profile.age, Some(30));
    assert_eq!(snapshot.user_profile.interests, vec!["музыка"]);
    assert_eq!(snapshot.user_profile.goals, vec!["выучить испанский"]);
    assert_eq!(snapshot.habits, vec!["бегает по утрам"]);
    assert_eq!(
        snapshot.user_profile.preferences.get("кофе").map(String::as_str),
        Some("без сахара")
    );
    assert_eq!(snapshot.relationships["Маша"].relation, "сестра");
    assert_eq!(snapshot.important_dates["день рождения"].date, "12 мая");
    assert!(snapshot.updated_at.is_some());

    // On-disk layout uses camelCase keys.
    let raw = read_json(&path);
    assert_eq!(raw["schemaVersion"], SCHEMA_VERSION);
    assert_eq!(raw["userProfile"]["name"], "Вася");
    assert!(raw["facts"][0]["addedAt"].is_string());
    assert!(raw["importantDates"].is_object());
    std::fs::remove_dir_all(&dir).ok();
}

#[cfg(unix)]
#[test]
fn snapshot_is_owner_only() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tmp_dir("perms");
    let path = dir.join("memory.json");
    let mut store = ProfileStore::load(&path);
    store.add_fact("секрет", None).unwrap();

    let mode = std::fs::metadata(&path).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);
    assert!(!dir.join("memory.json.tmp").exists());
    std::fs::remove_dir_all(&dir).ok();
}

#[cfg(unix)]
#[test]
fn export_is_owner_only() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tmp_dir("export-perms");
    let mut store = ProfileStore::load(dir.join("memory.json"));
    store.add_fact("секрет", None).unwrap();

    let exported = dir.join("backup.json");
    store.export(&exported).unwrap();

    let mode = std::fs::metadata(&exported).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);
    assert!(!dir.join("backup.json.tmp").exists());
    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn unknown_field_is_rejected_without_change() {
    let dir = tmp_dir("unknown");
    let path = dir.join("memory.json");
    let mut store = ProfileStore::load(&path);
    store.set_profile_field("name", "Вася").unwrap();
    let before = store.snapshot().clone();

    let err = store.set_profile_field("hobby", "x").unwrap_err();
    assert!(matches!(err, ProfileError::UnknownField(ref key) if key == "hobby"));
    assert!(err.to_string().contains("возраст"), "{err}");
    assert_eq!(store.snapshot(), &before);
    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn invalid_age_is_rejected() {
    let dir = tmp_dir("age");
    let mut store = ProfileStore::load(dir.join("memory.json"));
    let err = store.set_profile_field("возраст", "двадцать").unwrap_err();
    assert!(matches!(
        err,
        ProfileError::InvalidValue {
            field: ProfileField::Age,
            ..
        }
    ));
    assert!(store.profile().age.is_none());
    assert!(store.set_profile_field("age", "-3").is_err());

    assert_eq!(
        store.set_profile_field("город", " Москва ").unwrap(),
        ProfileField::Location
    );
    assert_eq!(
        store.profile().get(ProfileField::Location),
        Some(FieldValue::Text("Москва".into()))
    );
    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn add_interest_is_idempotent() {
    let dir = tmp_dir("idempotent");
    let path = dir.join("memory.json");
    let mut store = ProfileStore::load(&path);

    assert!(store.add_interest("jazz").unwrap());
    let saved_at = store.snapshot().updated_at;
    assert!(!store.add_interest("jazz").unwrap());
    assert_eq!(store.profile().interests, vec!["jazz"]);
    // No save on a repeated value.
    assert_eq!(store.snapshot().updated_at, saved_at);

    // Case-sensitive: a different spelling is a new entry.
    assert!(store.add_interest("Jazz").unwrap());
    assert!(store.add_habit("чай").unwrap());
    assert!(!store.add_habit("чай").unwrap());
    assert_eq!(store.snapshot().habits, vec!["чай"]);
    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn relationships_overwrite_by_name() {
    let dir = tmp_dir("relationships");
    let mut store = ProfileStore::load(dir.join("memory.json"));
    store.add_relationship("Петя", "друг", "").unwrap();
    store.add_relationship("Петя", "брат", "младший").unwrap();

    let relationships = &store.snapshot().relationships;
    assert_eq!(relationships.len(), 1);
    assert_eq!(relationships["Петя"].relation, "брат");
    assert_eq!(relationships["Петя"].details, "младший");
    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn search_is_case_insensitive() {
    let dir = tmp_dir("search");
    let mut store = ProfileStore::load(dir.join("memory.json"));
    store.add_fact("Любит ДЖАЗ и блюз", None).unwrap();
    store.add_fact("Работает врачом", None).unwrap();
    store.add_fact("Слушает джаз по вечерам", None).unwrap();

    let found: Vec<&str> = store
        .search_facts("джаз")
        .iter()
        .map(|f| f.text.as_str())
        .collect();
    assert_eq!(found, vec!["Любит ДЖАЗ и блюз", "Слушает джаз по вечерам"]);
    assert!(store.search_facts("кошка").is_empty());
    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn export_import_round_trip() {
    let dir = tmp_dir("roundtrip");
    let mut store = ProfileStore::load(dir.join("a.json"));
    store.set_profile_field("name", "Вася").unwrap();
    store.add_interest("шахматы").unwrap();
    store.add_fact("Пользователя зовут Вася", None).unwrap();
    store.add_relationship("Маша", "сестра", "").unwrap();

    let export = dir.join("export.json");
    store.export(&export).unwrap();

    let mut other = ProfileStore::load(dir.join("b.json"));
    other.import(&export).unwrap();

    let a = store.snapshot();
    let b = other.snapshot();
    assert_eq!(a.user_profile, b.user_profile);
    assert_eq!(a.facts, b.facts);
    assert_eq!(a.relationships, b.relationships);
    assert_eq!(a.important_dates, b.important_dates);
    assert_eq!(a.habits, b.habits);

    // Import persisted the merged snapshot.
    let reloaded = ProfileStore::load(dir.join("b.json"));
    assert_eq!(reloaded.snapshot().facts, a.facts);
    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn import_overwrites_present_keys_only() {
    let dir = tmp_dir("shallow");
    let mut store = ProfileStore::load(dir.join("memory.json"));
    store.set_profile_field("name", "Вася").unwrap();
    store.add_fact("старый факт", None).unwrap();
    store.add_habit("чай").unwrap();

    let partial = dir.join("partial.json");
    std::fs::write(
        &partial,
        r#"{
            "schemaVersion": 1,
            "facts": [
                {"text": "новый факт", "category": "general",
                 "addedAt": "2025-01-02T03:04:05Z", "session": "2025-01-02"}
            ]
        }"#,
    )
    .unwrap();
    store.import(&partial).unwrap();

    let snapshot = store.snapshot();
    assert_eq!(snapshot.facts.len(), 1);
    assert_eq!(snapshot.facts[0].text, "новый факт");
    assert_eq!(snapshot.user_profile.name.as_deref(), Some("Вася"));
    assert_eq!(snapshot.habits, vec!["чай"]);
    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn import_of_invalid_file_leaves_store_untouched() {
    let dir = tmp_dir("badimport");
    let mut store = ProfileStore::load(dir.join("memory.json"));
    store.add_fact("факт", None).unwrap();
    let before = store.snapshot().clone();

    let bad = dir.join("bad.json");
    std::fs::write(&bad, "[1, 2, 3]").unwrap();
    assert!(store.import(&bad).is_err());
    assert!(store.import(&dir.join("absent.json")).is_err());
    assert_eq!(store.snapshot(), &before);
    std::fs::remove_dir_all(&dir).ok();
}

const LEGACY: &str = r#"{
  "user_profile": {
    "name": "Ололол",
    "nickname": "Ололоша",
    "age": "27",
    "location": null,
    "occupation": null,
    "interests": ["музыка"],
    "goals": [],
    "preferences": {}
  },
  "facts": [
    {"fact": "Пользователя зовут Ололол", "category": "general",
     "added_at": "2025-02-10T18:30:00.123456", "session": "2025-02-10"}
  ],
  "relationships": {
    "Маша": {"relation": "сестра", "details": "", "added_at": "2025-02-10T18:31:00"}
  },
  "important_dates": {},
  "habits": [],
  "conversations_summary": [],
  "created_at": "2025-02-10T18:00:00.000001",
  "updated_at": "2025-02-10T18:31:00.5"
}"#;

#[test]
fn legacy_layout_is_migrated_on_load() {
    let dir = tmp_dir("legacy");
    let path = dir.join("memory.json");
    std::fs::write(&path, LEGACY).unwrap();

    let mut store = ProfileStore::load(&path);
    assert!(store.load_warning().is_none(), "{:?}", store.load_warning());
    let profile = store.profile();
    assert_eq!(profile.name.as_deref(), Some("Ололол"));
    assert_eq!(profile.nickname.as_deref(), Some("Ололоша"));
    assert_eq!(profile.age, Some(27));
    assert_eq!(store.snapshot().facts[0].text, "Пользователя зовут Ололол");
    assert_eq!(store.snapshot().relationships["Маша"].relation, "сестра");

    // The next save writes the current layout.
    store.add_fact("новый", None).unwrap();
    let raw = read_json(&path);
    assert_eq!(raw["schemaVersion"], SCHEMA_VERSION);
    assert!(raw.get("user_profile").is_none());
    assert!(raw.get("conversations_summary").is_none());
    assert_eq!(raw["facts"][0]["text"], "Пользователя зовут Ололол");
    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn legacy_layout_is_migrated_on_import() {
    let dir = tmp_dir("legacyimport");
    let legacy = dir.join("old.json");
    std::fs::write(&legacy, LEGACY).unwrap();

    let mut store = ProfileStore::load(dir.join("memory.json"));
    store.import(&legacy).unwrap();
    assert_eq!(store.profile().name.as_deref(), Some("Ололол"));
    assert_eq!(store.snapshot().facts.len(), 1);
    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn snapshot_from_json_accepts_current_layout() {
    let snapshot = Snapshot::new();
    let json = serde_json::to_string(&snapshot).unwrap();
    let parsed = Snapshot::from_json(&json).unwrap();
    assert_eq!(parsed, snapshot);
}

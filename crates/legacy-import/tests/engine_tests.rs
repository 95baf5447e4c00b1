//! End-to-end runs of the orchestrator against the in-memory backends.

use legacy_import::{
    ColumnMappingStore, Config, ImportError, LocalRecord, MemoryLocalStore, MemoryMappingStore, MemoryRemote,
    NoProgress, Orchestrator, Pass, Record, UnitStatus, Value,
};
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const CONFIG: &str = r#"
remote: { host: legacy, database: ss23, user: reader }
local: { host: localhost, database: ss4, user: writer }
types:
  - name: SiteTree
    tracked: true
    hierarchical: true
    fields: { Title: varchar, URLSegment: varchar }
  - name: Page
    parent: SiteTree
  - name: Member
    tracked: true
    fields: { Email: varchar, FirstName: varchar }
  - name: Group
    tracked: true
    fields: { Title: varchar }
  - name: Comment
    tracked: true
    fields: { Body: text }
    has_one: { Author: Member }
  - name: Tag
    tracked: true
    fields: { Title: varchar }
    has_one: { Owner: Member }
groups:
  tasks:
    - class: Member
      strategy: [Identify, Add, Update]
      idcolumns: [Email]
    - class: Comment
      strategy: [Add]
  members:
    - class: Group
      strategy: [Add]
    - importer: relation
      table: Group_Members
      fields: { GroupID: Group, MemberID: Member }
  pages:
    - importer: hierarchy
      class: SiteTree
      strategy: [Identify]
      idcolumns: [ParentID, URLSegment]
  tags:
    - class: Tag
      strategy: [Truncate]
"#;

struct Engine {
    orchestrator: Orchestrator,
    local: Arc<MemoryLocalStore>,
    store: Arc<MemoryMappingStore>,
}

impl Engine {
    fn new(remote: MemoryRemote) -> Self {
        let config = Config::from_yaml(CONFIG).unwrap();
        let catalog = Arc::new(config.catalog().unwrap());
        let local = Arc::new(
            MemoryLocalStore::new(catalog).with_table("Group_Members", &["ID", "GroupID", "MemberID"]),
        );
        let store = Arc::new(MemoryMappingStore::new());
        let orchestrator =
            Orchestrator::with_backends(config, Arc::new(remote), local.clone(), store.clone())
                .unwrap()
                .with_progress_sink(Arc::new(NoProgress));
        Self {
            orchestrator,
            local,
            store,
        }
    }

    async fn run(&self, group: &str) -> legacy_import::ImportResult {
        self.orchestrator
            .run(Some(group), None, CancellationToken::new())
            .await
            .unwrap()
    }
}

fn member(id: i64, email: impl Into<Value>) -> Record {
    Record::new()
        .with("ID", id)
        .with("ClassName", "Member")
        .with("Email", email)
}

fn comment(id: i64, author: i64) -> Record {
    Record::new()
        .with("ID", id)
        .with("ClassName", "Comment")
        .with("Body", format!("comment {}", id))
        .with("AuthorID", author)
}

fn local_member(email: impl Into<Value>) -> LocalRecord {
    let mut record = LocalRecord::new("Member");
    record.fields.set("Email", email);
    record
}

fn remote_fixture() -> MemoryRemote {
    MemoryRemote::new()
        .with_table("Member", vec![member(42, "a@x"), member(43, "b@x")])
        .with_table("Comment", vec![comment(1, 42), comment(2, 99)])
}

#[tokio::test]
async fn test_relation_ids_are_remapped_or_zeroed() {
    let engine = Engine::new(remote_fixture());
    for _ in 0..6 {
        engine.local.seed(local_member(Value::Null)).unwrap();
    }
    let seven = engine.local.seed(local_member("a@x")).unwrap();
    assert_eq!(seven, 7);

    let result = engine.run("tasks").await;
    assert_eq!(result.totals.identified, 1);
    assert_eq!(result.totals.unresolved, 1);
    assert_eq!(
        engine.orchestrator.mappings().find_local("Member", 42).await.unwrap(),
        Some(7)
    );
    let authors: Vec<i64> = engine
        .local
        .records("Comment")
        .iter()
        .map(|c| c.fields.get_i64("AuthorID"))
        .collect();
    assert_eq!(authors, vec![7, 0]);
}

#[tokio::test]
async fn test_second_run_is_idempotent() {
    let engine = Engine::new(remote_fixture());
    engine.local.seed(local_member("a@x")).unwrap();

    let first = engine.run("tasks").await;
    assert_eq!(first.totals.identified, 1);
    assert_eq!(first.totals.updated, 1);
    // one new member and both comments
    assert_eq!(first.totals.added, 3);
    let members = engine.local.records("Member");
    let comments = engine.local.records("Comment");
    let mappings = engine.store.all().len();

    let second = engine.run("tasks").await;
    assert_eq!(second.totals.identified, 0);
    assert_eq!(second.totals.added, 0);
    assert_eq!(second.totals.updated, 0);
    assert_eq!(engine.local.records("Member"), members);
    assert_eq!(engine.local.records("Comment"), comments);
    assert_eq!(engine.store.all().len(), mappings);
}

#[tokio::test]
async fn test_mappings_stay_one_to_one() {
    let remote = MemoryRemote::new()
        .with_table(
            "Member",
            vec![member(50, "dup@x"), member(44, "dup@x"), member(45, "c@x")],
        )
        .with_table("Comment", vec![comment(1, 0)]);
    let engine = Engine::new(remote);
    let local = engine.local.seed(local_member("dup@x")).unwrap();

    engine.run("tasks").await;
    engine.run("tasks").await;

    // lowest remote id wins the tie
    assert_eq!(
        engine.orchestrator.mappings().find_remote("Member", local).await.unwrap(),
        Some(44)
    );

    let all: Vec<_> = engine
        .store
        .all()
        .into_iter()
        .filter(|m| m.object_type == "Member")
        .collect();
    let locals: HashSet<_> = all.iter().map(|m| (&m.object_type, m.local_id)).collect();
    let remotes: HashSet<_> = all.iter().map(|m| (&m.object_type, m.remote_id)).collect();
    assert_eq!(locals.len(), all.len());
    assert_eq!(remotes.len(), all.len());
    assert_eq!(all.len(), 3);
}

#[tokio::test]
async fn test_null_keys_never_match() {
    let remote = MemoryRemote::new()
        .with_table("Member", vec![member(1, Value::Null)])
        .with_table("Comment", vec![comment(1, 0)]);
    let engine = Engine::new(remote);
    let local = engine.local.seed(local_member(Value::Null)).unwrap();

    let result = engine
        .orchestrator
        .run(Some("tasks"), Some(Pass::Identify), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(result.totals.identified, 0);
    assert_eq!(
        engine.orchestrator.mappings().find_remote("Member", local).await.unwrap(),
        None
    );
}

#[tokio::test]
async fn test_join_rows_converge_over_runs() {
    let remote = remote_fixture()
        .with_table(
            "Group",
            vec![Record::new().with("ID", 5).with("ClassName", "Group").with("Title", "Editors")],
        )
        .with_table(
            "Group_Members",
            vec![
                Record::new().with("ID", 1).with("GroupID", 5).with("MemberID", 42),
                Record::new().with("ID", 2).with("GroupID", 5).with("MemberID", 43),
            ],
        );
    let engine = Engine::new(remote);

    // Members are not imported yet: the join rows wait.
    let first = engine.run("members").await;
    assert_eq!(first.totals.skipped, 2);
    assert!(engine.local.rows("Group_Members").is_empty());

    engine.run("tasks").await;
    let second = engine.run("members").await;
    assert_eq!(second.totals.added, 2);

    let third = engine.run("members").await;
    assert_eq!(third.totals.added, 0);
    assert_eq!(engine.local.rows("Group_Members").len(), 2);
}

#[tokio::test]
async fn test_hierarchy_identify_follows_matched_parents() {
    fn page(id: i64, parent: i64, segment: &str) -> Record {
        Record::new()
            .with("ID", id)
            .with("ClassName", "Page")
            .with("ParentID", parent)
            .with("URLSegment", segment)
    }
    fn local_page(parent: i64, segment: &str) -> LocalRecord {
        let mut record = LocalRecord::new("Page");
        record.fields.set("ParentID", parent);
        record.fields.set("URLSegment", segment);
        record
    }

    let remote = MemoryRemote::new().with_table(
        "SiteTree",
        vec![
            page(1, 0, "home"),
            page(2, 1, "about"),
            page(3, 2, "team"),
            page(4, 0, "news"),
            page(5, 4, "team"),
        ],
    );
    let engine = Engine::new(remote);
    let home = engine.local.seed(local_page(0, "home")).unwrap();
    let about = engine.local.seed(local_page(home, "about")).unwrap();
    let team = engine.local.seed(local_page(about, "team")).unwrap();
    let blog = engine.local.seed(local_page(0, "blog")).unwrap();
    let blog_team = engine.local.seed(local_page(blog, "team")).unwrap();

    let result = engine.run("pages").await;
    assert_eq!(result.totals.identified, 3);

    let mappings = engine.orchestrator.mappings();
    assert_eq!(mappings.find_remote("SiteTree", team).await.unwrap(), Some(3));
    assert_eq!(mappings.find_remote("SiteTree", blog).await.unwrap(), None);
    assert_eq!(mappings.find_remote("SiteTree", blog_team).await.unwrap(), None);
}

#[tokio::test]
async fn test_truncate_replaces_with_legacy_ids() {
    let remote = MemoryRemote::new().with_table(
        "Tag",
        vec![
            Record::new().with("ID", 40).with("ClassName", "Tag").with("Title", "a").with("OwnerID", 42),
            Record::new().with("ID", 41).with("ClassName", "Tag").with("Title", "b"),
        ],
    );
    let engine = Engine::new(remote);
    let mut old = LocalRecord::new("Tag");
    old.fields.set("Title", "old");
    engine.local.seed(old).unwrap();

    let result = engine.run("tags").await;
    assert_eq!(result.totals.added, 2);
    let ids: Vec<i64> = engine.local.records("Tag").iter().map(|t| t.id).collect();
    assert_eq!(ids, vec![40, 41]);
}

#[test]
fn test_truncate_of_tree_type_refused_before_mutation() {
    let config = format!(
        "{}\n  pages_destroy:\n    - class: SiteTree\n      strategy: [Truncate]\n",
        CONFIG.trim_end()
    );
    let err = Config::from_yaml(&config).unwrap_err();
    assert!(matches!(err, ImportError::Config(ref m) if m.contains("hierarchical")));
}

#[tokio::test]
async fn test_missing_remote_table_fails_only_that_unit() {
    let remote = MemoryRemote::new().with_table("Member", vec![member(42, "a@x")]);
    let engine = Engine::new(remote);

    let result = engine
        .orchestrator
        .execute(Some("tasks"), None, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(result.units[0].status, UnitStatus::Completed);
    assert_eq!(result.units[1].status, UnitStatus::Failed);
    assert_eq!(engine.local.records("Member").len(), 1);
    assert!(matches!(
        result.ensure_success(),
        Err(ImportError::UnitsFailed { count: 1, .. })
    ));
}

const COLUMNS_CONFIG: &str = r#"
remote: { host: legacy, database: ss23, user: reader }
local: { host: localhost, database: ss4, user: writer }
mapping: { storage: legacy_columns }
types:
  - name: Member
    tracked: true
    fields: { Email: varchar, FirstName: varchar }
  - name: Comment
    tracked: true
    fields: { Body: text }
    has_one: { Author: Member }
groups:
  tasks:
    - class: Member
      strategy: [Identify, Add, Update]
      idcolumns: [Email]
    - class: Comment
      remote_table: PageComment
      strategy: [Add]
"#;

#[tokio::test]
async fn test_legacy_columns_rerun_is_idempotent() {
    let config = Config::from_yaml(COLUMNS_CONFIG).unwrap();
    let catalog = Arc::new(config.catalog().unwrap());
    let remote = Arc::new(
        MemoryRemote::new()
            .with_table("Member", vec![member(42, "a@x"), member(43, "b@x")])
            .with_table("PageComment", vec![comment(1, 42), comment(2, 43)]),
    );
    let local = Arc::new(MemoryLocalStore::new(catalog));
    local.seed(local_member("a@x")).unwrap();
    let store = Arc::new(ColumnMappingStore::new(remote.clone(), local.clone()));
    let orchestrator = Orchestrator::with_backends(config, remote.clone(), local.clone(), store)
        .unwrap()
        .with_progress_sink(Arc::new(NoProgress));

    let first = orchestrator
        .run(Some("tasks"), None, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(first.totals.identified, 1);
    assert_eq!(first.totals.added, 3);

    // bookkeeping lands on the renamed legacy table
    assert!(remote.rows("Comment").is_empty());
    let imported: Vec<i64> = remote
        .rows("PageComment")
        .iter()
        .map(|r| r.get_i64("_ImportedID"))
        .collect();
    assert_eq!(imported, vec![1, 2]);
    let legacy: Vec<i64> = local
        .records("Comment")
        .iter()
        .map(|c| c.fields.get_i64("LegacyID"))
        .collect();
    assert_eq!(legacy, vec![1, 2]);

    let members = local.records("Member");
    let comments = local.records("Comment");
    let second = orchestrator
        .run(Some("tasks"), None, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(second.totals.identified, 0);
    assert_eq!(second.totals.added, 0);
    assert_eq!(second.totals.updated, 0);
    assert_eq!(local.records("Member"), members);
    assert_eq!(local.records("Comment"), comments);
}

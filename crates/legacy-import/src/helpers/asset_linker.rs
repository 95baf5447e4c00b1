//! Asset linker: fetches referenced files and links file relations.
//!
//! For every synced record it
//!
//! 1. imports each `<img src>` under the assets directory found in the
//!    record's rich text fields,
//! 2. resolves every has-one relation to a file type through the identity
//!    map or by file name, importing the file record when needed,
//! 3. makes sure the record's own file is on disk if it is a file.
//!
//! Fetch failures are logged and counted, never fatal.

use async_trait::async_trait;
use regex_lite::Regex;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{LazyLock, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, trace};

use super::Helper;
use crate::config::{AssetsConfig, HelperConfig};
use crate::core::{lock, Condition, LocalRecord, RemoteRecord, SelectQuery, Value};
use crate::error::{ImportError, Result};
use crate::importer::copier::{is_skipped_column, relation_name};
use crate::importer::{absorb_conflict, ImportContext, UnitReport};
use crate::mapping::IdentityMap;

static IMG_SRC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<img[^>]*?\ssrc\s*=\s*["']([^"']+)["']"#).unwrap()
});

static RESAMPLED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.*/)_resampled/[^-/]+-([^/]*)$").unwrap());

/// Original file of a `_resampled/<variant>-<name>` path.
pub fn resampled_original(path: &str) -> Option<String> {
    RESAMPLED
        .captures(path)
        .map(|caps| format!("{}{}", &caps[1], &caps[2]))
}

/// Relative path under the base folder, refusing anything that escapes it.
pub fn safe_relative(path: &str) -> Option<PathBuf> {
    let relative = Path::new(path.trim_start_matches('/'));
    let mut clean = PathBuf::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if clean.as_os_str().is_empty() {
        None
    } else {
        Some(clean)
    }
}

/// Fetches and links files referenced by synced records.
pub struct AssetLinker {
    name: String,
    ctx: ImportContext,
    assets: AssetsConfig,
    conditions: Vec<Condition>,
    client: reqwest::Client,
    folders: Mutex<HashMap<String, i64>>,
}

impl AssetLinker {
    pub fn new(
        name: &str,
        ctx: ImportContext,
        assets: AssetsConfig,
        config: &HelperConfig,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(assets.fetch_timeout_secs))
            .build()?;
        Ok(Self {
            name: name.to_string(),
            ctx,
            conditions: config.r#where.iter().cloned().map(Condition::Raw).collect(),
            assets,
            client,
            folders: Mutex::new(HashMap::new()),
        })
    }

    fn file_table(&self) -> String {
        self.ctx.catalog.base_type(&self.assets.file_type).to_string()
    }

    fn remote_url(&self, path: &str) -> Result<String> {
        let site = self
            .assets
            .remote_site
            .as_deref()
            .ok_or_else(|| ImportError::Config("assets.remote_site is not set".into()))?;
        Ok(format!(
            "{}/{}",
            site.trim_end_matches('/'),
            path.trim_start_matches('/')
        ))
    }

    /// Make sure a site-relative file exists under the base folder.
    ///
    /// Returns false when the remote copy could not be fetched.
    pub async fn ensure_file_local(&self, path: &str) -> Result<bool> {
        let relative = safe_relative(path)
            .ok_or_else(|| ImportError::fetch(path, "path escapes the base folder"))?;
        let local_path = self.assets.base_folder.join(&relative);

        let present = self.fetch_to(path, &local_path).await?;
        if let Some(original) = resampled_original(path) {
            if let Some(original_relative) = safe_relative(&original) {
                let original_path = self.assets.base_folder.join(original_relative);
                self.fetch_to(&original, &original_path).await?;
            }
        }
        Ok(present)
    }

    /// Ensure a file, counting a miss as an asset failure.
    async fn ensure_counted(&self, path: &str, report: &mut UnitReport) -> Result<()> {
        match self.ensure_file_local(path).await {
            Ok(true) => Ok(()),
            Ok(false) => {
                report.assets_failed += 1;
                Ok(())
            }
            Err(ImportError::Fetch { path, message }) => {
                error!("Skipping file {}: {}", path, message);
                report.assets_failed += 1;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Fetch one file unless present. Transfer and filesystem failures are
    /// logged and reported as false.
    async fn fetch_to(&self, path: &str, local_path: &Path) -> Result<bool> {
        match tokio::fs::try_exists(local_path).await {
            Ok(true) => {
                trace!("{} already present", path);
                return Ok(true);
            }
            Ok(false) => {}
            Err(e) => {
                error!("error checking {}: {}", local_path.display(), e);
                return Ok(false);
            }
        }

        let url = self.remote_url(path)?;
        let body = match self.download(&url).await {
            Ok(body) => body,
            Err(message) => {
                error!("error copying {}: {}", path, message);
                return Ok(false);
            }
        };

        if let Err(e) = write_file(local_path, &body).await {
            error!("error writing {}: {}", local_path.display(), e);
            return Ok(false);
        }
        info!("copied file {}", path);
        Ok(true)
    }

    async fn download(&self, url: &str) -> std::result::Result<Vec<u8>, String> {
        let response = self.client.get(url).send().await.map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!("HTTP {}", response.status()));
        }
        let body = response.bytes().await.map_err(|e| e.to_string())?;
        Ok(body.to_vec())
    }

    /// Image paths under the assets directory referenced by rich text fields.
    pub fn html_image_urls(&self, local: &LocalRecord) -> Vec<String> {
        let prefix = format!("{}/", self.assets.assets_dir).to_lowercase();
        let site = self
            .assets
            .remote_site
            .as_deref()
            .map(|s| s.trim_end_matches('/'));

        let mut urls = Vec::new();
        for field in self.ctx.catalog.html_fields(&local.class_name) {
            let Some(html) = local.fields.get_str(&field) else {
                continue;
            };
            for caps in IMG_SRC.captures_iter(html) {
                let mut src = &caps[1];
                if let Some(stripped) = site.and_then(|s| src.strip_prefix(s)) {
                    src = stripped;
                }
                let src = src.trim_start_matches('/');
                if src.to_lowercase().starts_with(&prefix) {
                    urls.push(src.to_string());
                }
            }
        }
        urls
    }

    /// Local folder id for a path relative to the assets directory,
    /// creating folder records as needed.
    async fn find_or_make_folder(&self, path: &str) -> Result<i64> {
        let path = path.trim_matches('/');
        if path.is_empty() || path == "." {
            return Ok(0);
        }
        let cached = lock(&self.folders).get(path).copied();
        if let Some(id) = cached {
            return Ok(id);
        }

        let mut parent = 0;
        let mut filename = format!("{}/", self.assets.assets_dir);
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            filename.push_str(segment);
            filename.push('/');
            let existing = self
                .ctx
                .local
                .find_first(
                    &self.assets.folder_type,
                    &[Condition::eq("Filename", filename.clone())],
                )
                .await?;
            parent = match existing {
                Some(folder) => folder.id,
                None => {
                    let mut folder = LocalRecord::new(self.assets.folder_type.clone());
                    folder.fields.set("Name", segment);
                    folder.fields.set("Title", segment);
                    folder.fields.set("Filename", filename.clone());
                    folder.fields.set("ParentID", parent);
                    let id = self.ctx.local.insert(&mut folder).await?;
                    debug!("Created folder {}", filename);
                    id
                }
            };
        }

        lock(&self.folders).insert(path.to_string(), parent);
        Ok(parent)
    }

    fn folder_of(&self, filename: &str) -> String {
        let dir = filename.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("");
        dir.strip_prefix(&self.assets.assets_dir)
            .unwrap_or(dir)
            .trim_matches('/')
            .to_string()
    }

    async fn find_remote_file(&self, condition: Condition) -> Result<Option<RemoteRecord>> {
        let query = SelectQuery::from(self.file_table())
            .filters(self.conditions.iter().cloned())
            .filter(condition)
            .order_by("ID")
            .limit(1);
        Ok(self.ctx.remote.select(&query).await?.into_iter().next())
    }

    /// Copy non-relation fields of a remote file, save and map it.
    async fn update_local_file(
        &self,
        local: &mut LocalRecord,
        remote: &RemoteRecord,
        report: &mut UnitReport,
    ) -> Result<()> {
        for (column, value) in remote.iter() {
            if is_skipped_column(column) || relation_name(column).is_some() {
                continue;
            }
            local.fields.set(column.clone(), value.clone());
        }
        self.ctx.local.save(local).await?;
        let result = self
            .ctx
            .mappings
            .record(
                &self.assets.file_type,
                local.id,
                remote.id(),
                Some(IdentityMap::now()),
            )
            .await;
        absorb_conflict(result, report)?;
        Ok(())
    }

    /// Local file record for a site-relative path, creating it if needed.
    async fn import_file(&self, path: &str, report: &mut UnitReport) -> Result<i64> {
        debug!("Importing file {}", path);
        let resampled = resampled_original(path);
        let filename = resampled.clone().unwrap_or_else(|| path.to_string());

        let existing = self
            .ctx
            .local
            .find_first(
                &self.assets.file_type,
                &[Condition::eq("Filename", filename.clone())],
            )
            .await?;
        let local = match existing {
            Some(local) => local,
            None => self.make_local_file(&filename, report).await?,
        };

        let stored = local
            .fields
            .get_str("Filename")
            .unwrap_or(&filename)
            .to_string();
        self.ensure_counted(&stored, report).await?;
        if resampled.is_some() {
            self.ensure_counted(path, report).await?;
        }
        Ok(local.id)
    }

    async fn make_local_file(&self, filename: &str, report: &mut UnitReport) -> Result<LocalRecord> {
        let parent = self.find_or_make_folder(&self.folder_of(filename)).await?;
        let remote = self
            .find_remote_file(Condition::eq("Filename", filename))
            .await?;

        let extension = filename.rsplit_once('.').map(|(_, e)| e).unwrap_or("");
        let class = self.ctx.catalog.resolve_class(
            &self.assets.file_type,
            Some(self.assets.class_for_extension(extension)),
        );
        let mut local = LocalRecord::new(class);
        local.fields.set("ParentID", parent);

        match remote {
            Some(remote) => self.update_local_file(&mut local, &remote, report).await?,
            None => {
                let name = filename.rsplit('/').next().unwrap_or(filename);
                local.fields.set("Name", name);
                local.fields.set("Filename", filename);
                self.ctx.local.save(&mut local).await?;
            }
        }
        Ok(local)
    }

    /// Local file record for a remote file row.
    async fn find_or_import_file(
        &self,
        remote: &RemoteRecord,
        report: &mut UnitReport,
    ) -> Result<i64> {
        let filename = remote.get_str("Filename").unwrap_or_default().to_string();
        if !filename.is_empty() {
            self.ensure_counted(&filename, report).await?;
        }

        if let Some(local_id) = self
            .ctx
            .mappings
            .find_local(&self.assets.file_type, remote.id())
            .await?
        {
            if self
                .ctx
                .local
                .get(&self.assets.file_type, local_id)
                .await?
                .is_some()
            {
                return Ok(local_id);
            }
        }

        let by_name = self
            .ctx
            .local
            .find_first(
                &self.assets.file_type,
                &[Condition::eq("Filename", filename.clone())],
            )
            .await?;
        if let Some(local) = by_name {
            let result = self
                .ctx
                .mappings
                .record(
                    &self.assets.file_type,
                    local.id,
                    remote.id(),
                    Some(IdentityMap::now()),
                )
                .await;
            absorb_conflict(result, report)?;
            return Ok(local.id);
        }

        let class = self
            .ctx
            .catalog
            .resolve_class(&self.assets.file_type, remote.class_name());
        let mut local = LocalRecord::new(class);
        let parent = self.find_or_make_folder(&self.folder_of(&filename)).await?;
        local.fields.set("ParentID", parent);
        self.update_local_file(&mut local, remote, report).await?;
        Ok(local.id)
    }

    /// Resolve every has-one relation to a file type.
    async fn link_file_relations(
        &self,
        local: &mut LocalRecord,
        remote: &RemoteRecord,
        report: &mut UnitReport,
    ) -> Result<()> {
        let catalog = &self.ctx.catalog;
        for (relation, class) in catalog.has_one_all(&local.class_name) {
            if !catalog.is_a(&class, &self.assets.file_type) {
                continue;
            }
            if catalog.is_a(&class, &self.assets.folder_type) {
                trace!("{} is a folder", relation);
                continue;
            }

            let field = format!("{}ID", relation);
            if local.fields.get(&field).is_some_and(|v| !v.is_empty()) {
                trace!("{} already set on {}", field, local.label());
                continue;
            }
            let remote_file_id = remote.get_i64(&field);
            if remote_file_id <= 0 {
                continue;
            }

            let Some(remote_file) = self
                .find_remote_file(Condition::eq("ID", remote_file_id))
                .await?
            else {
                error!("Could not find {} file with id {}", relation, remote_file_id);
                report.assets_failed += 1;
                continue;
            };

            let name = remote_file
                .get_str("Name")
                .or_else(|| remote_file.get_str("Filename"))
                .unwrap_or_default();
            if !self.assets.is_allowed(name) {
                error!("Remote {} file does not have a valid name '{}'", relation, name);
                report.assets_failed += 1;
                continue;
            }

            let file_id = self.find_or_import_file(&remote_file, report).await?;
            debug!("{} assigned local value {}", relation, file_id);
            local.fields.set(field, Value::Int(file_id));
            report.linked += 1;
        }
        Ok(())
    }
}

/// Write a fetched file, creating its directories, group-writable.
async fn write_file(path: &Path, body: &[u8]) -> std::io::Result<()> {
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    tokio::fs::write(path, body).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o664)).await?;
    }
    Ok(())
}

#[async_trait]
impl Helper for AssetLinker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn init(&self) -> Result<()> {
        self.ctx.catalog.require(&self.assets.file_type)?;
        self.ctx.catalog.require(&self.assets.folder_type)?;
        if !self.ctx.catalog.is_tracked(&self.assets.file_type) {
            return Err(ImportError::precondition(
                format!("helper {}", self.name),
                format!("{} does not carry legacy identity", self.assets.file_type),
            ));
        }
        let table = self.file_table();
        self.ctx
            .mappings
            .prepare(&self.assets.file_type, Some(table.as_str()))
            .await
    }

    async fn update_local_object(
        &self,
        local: &mut LocalRecord,
        remote: &RemoteRecord,
    ) -> Result<UnitReport> {
        let mut report = UnitReport::default();
        trace!("Updating assets of {}", local.label());

        for url in self.html_image_urls(local) {
            match self.import_file(&url, &mut report).await {
                Ok(_) => {}
                Err(ImportError::Fetch { path, message }) => {
                    error!("Skipping image {}: {}", path, message);
                    report.assets_failed += 1;
                }
                Err(e) => return Err(e),
            }
        }

        self.link_file_relations(local, remote, &mut report).await?;

        if self
            .ctx
            .catalog
            .is_a(&local.class_name, &self.assets.file_type)
        {
            if let Some(filename) = local.fields.get_str("Filename").map(str::to_string) {
                self.ensure_counted(&filename, &mut report).await?;
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConflictPolicy, HelperKind};
    use crate::core::{FieldKind, Record, TypeCatalog, TypeDef};
    use crate::drivers::{MemoryLocalStore, MemoryRemote};
    use crate::mapping::MemoryMappingStore;
    use crate::orchestrator::progress::NoProgress;
    use std::sync::Arc;

    struct Fixture {
        linker: AssetLinker,
        local: Arc<MemoryLocalStore>,
        ctx: ImportContext,
        _dir: tempfile::TempDir,
    }

    fn fixture(files: Vec<Record>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let uploads = dir.path().join("assets/Uploads");
        std::fs::create_dir_all(&uploads).unwrap();
        std::fs::write(uploads.join("hero.jpg"), b"jpg").unwrap();
        std::fs::write(uploads.join("inline.png"), b"png").unwrap();

        let catalog = Arc::new(
            TypeCatalog::from_defs(vec![
                TypeDef::new("File").tracked(),
                TypeDef::new("Folder").extends("File"),
                TypeDef::new("Image").extends("File"),
                TypeDef::new("Page")
                    .tracked()
                    .field("Content", FieldKind::Html)
                    .has_one("Hero", "Image")
                    .has_one("Directory", "Folder"),
            ])
            .unwrap(),
        );
        let local = Arc::new(MemoryLocalStore::new(catalog.clone()));
        let ctx = ImportContext {
            remote: Arc::new(MemoryRemote::new().with_table("File", files)),
            local: local.clone(),
            mappings: Arc::new(IdentityMap::new(
                Arc::new(MemoryMappingStore::new()),
                catalog.clone(),
                ConflictPolicy::Reject,
            )),
            catalog,
            progress: Arc::new(NoProgress),
        };
        let assets = AssetsConfig {
            remote_site: Some("http://old.example.com".into()),
            base_folder: dir.path().to_path_buf(),
            ..Default::default()
        };
        let helper = HelperConfig {
            kind: HelperKind::AssetLinker,
            r#where: Vec::new(),
        };
        let linker = AssetLinker::new("assets", ctx.clone(), assets, &helper).unwrap();
        Fixture {
            linker,
            local,
            ctx,
            _dir: dir,
        }
    }

    fn remote_file(id: i64, name: &str) -> Record {
        Record::new()
            .with("ID", id)
            .with("ClassName", "Image")
            .with("Name", name)
            .with("Filename", format!("assets/Uploads/{}", name))
            .with("ParentID", 3)
    }

    #[test]
    fn test_resampled_original() {
        assert_eq!(
            resampled_original("assets/Uploads/_resampled/SetWidth100-hero.jpg"),
            Some("assets/Uploads/hero.jpg".to_string())
        );
        assert_eq!(resampled_original("assets/Uploads/hero.jpg"), None);
    }

    #[test]
    fn test_safe_relative_rejects_escape() {
        assert!(safe_relative("assets/../../etc/passwd").is_none());
        assert_eq!(
            safe_relative("/assets/a.jpg"),
            Some(PathBuf::from("assets/a.jpg"))
        );
    }

    #[tokio::test]
    async fn test_ensure_file_local_rejects_traversal() {
        let fx = fixture(Vec::new());
        let err = fx.linker.ensure_file_local("../secret").await.unwrap_err();
        assert!(matches!(err, ImportError::Fetch { .. }));
    }

    #[tokio::test]
    async fn test_existing_file_not_refetched() {
        let fx = fixture(Vec::new());
        assert!(fx
            .linker
            .ensure_file_local("assets/Uploads/hero.jpg")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_unwritable_base_folder_is_not_fatal() {
        let fx = fixture(vec![remote_file(12, "a.jpg")]);
        let blocker = fx._dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"").unwrap();
        let assets = AssetsConfig {
            base_folder: blocker,
            ..fx.linker.assets.clone()
        };
        let helper = HelperConfig {
            kind: HelperKind::AssetLinker,
            r#where: Vec::new(),
        };
        let linker = AssetLinker::new("assets", fx.ctx.clone(), assets, &helper).unwrap();

        assert!(!linker
            .ensure_file_local("assets/Uploads/a.jpg")
            .await
            .unwrap());

        let remote_page = Record::new().with("ID", 1).with("HeroID", 12);
        let mut page = LocalRecord::new("Page");
        let report = linker
            .update_local_object(&mut page, &remote_page)
            .await
            .unwrap();
        assert_eq!(report.assets_failed, 1);
        assert_eq!(report.linked, 1);
        assert!(page.fields.get_i64("HeroID") > 0);
    }

    #[tokio::test]
    async fn test_links_file_relation_and_creates_folders() {
        let fx = fixture(vec![remote_file(12, "hero.jpg")]);
        let remote_page = Record::new()
            .with("ID", 1)
            .with("HeroID", 12)
            .with("DirectoryID", 3);
        let mut page = LocalRecord::new("Page");

        let report = fx
            .linker
            .update_local_object(&mut page, &remote_page)
            .await
            .unwrap();
        assert_eq!(report.linked, 1);
        assert_eq!(report.assets_failed, 0);

        let file_id = page.fields.get_i64("HeroID");
        assert!(file_id > 0);
        assert!(!page.fields.contains("DirectoryID"));
        assert_eq!(
            fx.ctx.mappings.find_local("File", 12).await.unwrap(),
            Some(file_id)
        );

        let files = fx.local.records("File");
        let folder = files.iter().find(|f| f.class_name == "Folder").unwrap();
        assert_eq!(folder.fields.get_str("Filename"), Some("assets/Uploads/"));
        let image = files.iter().find(|f| f.id == file_id).unwrap();
        assert_eq!(image.class_name, "Image");
        assert_eq!(image.fields.get_i64("ParentID"), folder.id);
    }

    #[tokio::test]
    async fn test_disallowed_extension_counted() {
        let fx = fixture(vec![remote_file(12, "setup.exe")]);
        let remote_page = Record::new().with("ID", 1).with("HeroID", 12);
        let mut page = LocalRecord::new("Page");
        let report = fx
            .linker
            .update_local_object(&mut page, &remote_page)
            .await
            .unwrap();
        assert_eq!(report.assets_failed, 1);
        assert!(!page.fields.contains("HeroID"));
    }

    #[tokio::test]
    async fn test_html_images_imported() {
        let fx = fixture(Vec::new());
        let mut page = LocalRecord::new("Page");
        page.fields.set(
            "Content",
            r#"<p><img class="left" src="/assets/Uploads/inline.png"><img src="http://cdn.example.com/x.png"></p>"#,
        );
        assert_eq!(
            fx.linker.html_image_urls(&page),
            vec!["assets/Uploads/inline.png".to_string()]
        );

        let report = fx
            .linker
            .update_local_object(&mut page, &Record::new().with("ID", 1))
            .await
            .unwrap();
        assert_eq!(report.assets_failed, 0);
        let files = fx.local.records("File");
        assert!(files
            .iter()
            .any(|f| f.fields.get_str("Filename") == Some("assets/Uploads/inline.png")));
    }
}

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt, fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
    time::UNIX_EPOCH,
};

use av_traits::{Codec, CodecInfo, CodecTag, Direction, StreamFormat};
use serde::{Deserialize, Serialize};
use snafu::ResultExt;

use crate::{
    builtin_provider,
    error::{CacheFormatSnafu, CacheSnafu},
    plugin::{DylibLoader, Module, ModuleLoader, CODEC_API_VERSION},
    CodecProvider, Error, RegistryConfig, Result,
};

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CodecQuery {
    Fourcc(CodecTag),
    /// A legacy `wFormatTag`, used for AVI audio.
    WavId(u16),
    Name(String),
}

impl CodecQuery {
    pub fn matches(&self, info: &CodecInfo) -> bool {
        match self {
            Self::Fourcc(tag) => info.handles_fourcc(*tag),
            Self::WavId(id) => info.handles_wav_id(*id),
            Self::Name(name) => info.name == *name,
        }
    }
}

impl fmt::Display for CodecQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fourcc(tag) => write!(f, "fourcc \"{}\"", tag),
            Self::WavId(id) => write!(f, "wav format 0x{:04x}", id),
            Self::Name(name) => write!(f, "codec \"{}\"", name),
        }
    }
}

/// A constructed codec along with the metadata it was found by.
pub struct BoundCodec {
    pub info: CodecInfo,
    pub codec: Box<dyn Codec>,
}

impl fmt::Debug for BoundCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundCodec").field("info", &self.info.name).finish()
    }
}

/// The interface the engine uses to find and bind codecs.
pub trait CodecLookup: Send + Sync {
    fn find(&self, query: &CodecQuery, direction: Direction) -> Option<CodecInfo>;

    fn bind(&self, query: &CodecQuery, direction: Direction, format: &StreamFormat) -> Result<BoundCodec>;

    /// Lists every codec able to serve `direction`.
    fn list(&self, direction: Direction) -> Vec<CodecInfo>;
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
struct CacheRecord {
    path: PathBuf,
    mtime_secs: u64,
    mtime_nanos: u32,
    index: usize,
    info: CodecInfo,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct CacheFile {
    records: Vec<CacheRecord>,
}

type ModificationTime = (u64, u32);

struct ModuleEntry {
    mtime: ModificationTime,
    /// Modules known only from the cache aren't loaded until one of their codecs is bound.
    module: Option<Arc<dyn Module>>,
    codecs: Vec<(usize, CodecInfo)>,
}

#[derive(Clone)]
enum Source {
    Module(PathBuf, usize),
    Static(Arc<dyn CodecProvider>, usize),
}

#[derive(Default)]
struct Inner {
    scanned: bool,
    modules: BTreeMap<PathBuf, ModuleEntry>,
    providers: Vec<Arc<dyn CodecProvider>>,
}

impl Inner {
    /// Every known codec. Modules come first, in path order, followed by static providers in
    /// registration order.
    fn entries(&self) -> Vec<(CodecInfo, Source)> {
        let mut entries = Vec::new();
        for (path, module) in &self.modules {
            for (index, info) in &module.codecs {
                entries.push((info.clone(), Source::Module(path.clone(), *index)));
            }
        }
        for provider in &self.providers {
            for (index, info) in provider.codecs().into_iter().enumerate() {
                entries.push((info, Source::Static(provider.clone(), index)));
            }
        }
        entries
    }

    fn find(&self, query: &CodecQuery, direction: Direction) -> Option<(CodecInfo, Source)> {
        self.entries()
            .into_iter()
            .find(|(info, _)| info.direction.supports(direction) && query.matches(info))
    }
}

fn modification_time(path: &Path) -> std::io::Result<ModificationTime> {
    let modified = fs::metadata(path)?.modified()?;
    let since_epoch = modified.duration_since(UNIX_EPOCH).unwrap_or_default();
    Ok((since_epoch.as_secs(), since_epoch.subsec_nanos()))
}

/// The process's codec registry.
///
/// The plugin directory is scanned the first time the registry is used. Each module's codecs are
/// cached along with the module's modification time, so later scans only load modules that have
/// changed. Every operation takes the registry-wide lock.
pub struct Registry {
    config: RegistryConfig,
    loader: Box<dyn ModuleLoader>,
    inner: Mutex<Inner>,
}

lazy_static! {
    static ref GLOBAL: Arc<Registry> = Arc::new(Registry::with_builtins(RegistryConfig::from_env(), Box::new(DylibLoader)));
}

impl Registry {
    pub fn new(config: RegistryConfig, loader: Box<dyn ModuleLoader>) -> Self {
        Self {
            config,
            loader,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Creates a registry that also offers the built-in codecs.
    pub fn with_builtins(config: RegistryConfig, loader: Box<dyn ModuleLoader>) -> Self {
        let registry = Self::new(config, loader);
        registry.add_provider(Arc::new(builtin_provider()));
        registry
    }

    /// The registry configured from the environment, using shared libraries as modules.
    pub fn global() -> Arc<Registry> {
        GLOBAL.clone()
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn add_provider(&self, provider: Arc<dyn CodecProvider>) {
        self.lock().providers.push(provider);
    }

    /// Scans the plugin directory again, reloading only the modules that changed.
    pub fn rescan(&self) -> Result<()> {
        let mut inner = self.lock();
        self.scan(&mut inner)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn ensure_scanned(&self, inner: &mut Inner) {
        if !inner.scanned {
            if let Err(e) = self.scan(inner) {
                log::warn!("codec registry scan failed: {}", e);
            }
        }
    }

    fn read_cache(&self) -> Result<BTreeMap<PathBuf, ModuleEntry>> {
        let mut modules = BTreeMap::new();
        let Some(path) = &self.config.cache_file else {
            return Ok(modules);
        };
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(modules),
            Err(e) => return Err(e).context(CacheSnafu { path: path.clone() }),
        };
        let cache: CacheFile = serde_json::from_slice(&data).context(CacheFormatSnafu { path: path.clone() })?;
        for record in cache.records {
            let entry = modules.entry(record.path).or_insert_with(|| ModuleEntry {
                mtime: (record.mtime_secs, record.mtime_nanos),
                module: None,
                codecs: Vec::new(),
            });
            entry.codecs.push((record.index, record.info));
        }
        Ok(modules)
    }

    fn write_cache(&self, inner: &Inner) -> Result<()> {
        let Some(path) = &self.config.cache_file else {
            return Ok(());
        };
        let mut cache = CacheFile::default();
        for (module_path, module) in &inner.modules {
            for (index, info) in &module.codecs {
                cache.records.push(CacheRecord {
                    path: module_path.clone(),
                    mtime_secs: module.mtime.0,
                    mtime_nanos: module.mtime.1,
                    index: *index,
                    info: info.clone(),
                });
            }
        }
        let data = serde_json::to_vec_pretty(&cache).context(CacheFormatSnafu { path: path.clone() })?;
        fs::write(path, data).context(CacheSnafu { path: path.clone() })?;
        log::debug!("wrote {} codec records to {}", cache.records.len(), path.display());
        Ok(())
    }

    fn load_module(&self, path: &Path) -> Result<Arc<dyn Module>> {
        let module = self.loader.load(path)?;
        if module.api_version() != CODEC_API_VERSION {
            return Err(Error::ApiVersionMismatch {
                path: path.to_path_buf(),
                found: module.api_version(),
                expected: CODEC_API_VERSION,
            });
        }
        Ok(module)
    }

    fn describe_module(&self, path: &Path, mtime: ModificationTime) -> Result<ModuleEntry> {
        let module = self.load_module(path)?;
        let mut codecs = Vec::new();
        for index in 0..module.codec_count() {
            match module.codec_info(index) {
                Ok(info) => codecs.push((index, info)),
                Err(e) => log::warn!("skipping codec: {}", e),
            }
        }
        Ok(ModuleEntry {
            mtime,
            module: Some(module),
            codecs,
        })
    }

    fn module_paths(&self, dir: &Path) -> Vec<PathBuf> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!("unable to read codec directory {}: {}", dir.display(), e);
                return Vec::new();
            }
        };
        let mut paths: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file() && p.extension().map_or(false, |ext| ext == self.config.module_extension.as_str()))
            .collect();
        paths.sort();
        paths
    }

    fn scan(&self, inner: &mut Inner) -> Result<()> {
        let first_scan = !inner.scanned;
        inner.scanned = true;
        let Some(dir) = &self.config.plugin_dir else {
            return Ok(());
        };

        let mut changed = false;
        if first_scan {
            match self.read_cache() {
                Ok(modules) => inner.modules = modules,
                Err(e) => {
                    log::warn!("ignoring codec cache: {}", e);
                    changed = true;
                }
            }
        }

        let paths = self.module_paths(dir);
        for path in &paths {
            let mtime = match modification_time(path) {
                Ok(mtime) => mtime,
                Err(e) => {
                    log::warn!("skipping codec module {}: {}", path.display(), e);
                    continue;
                }
            };
            if inner.modules.get(path).map_or(false, |m| m.mtime == mtime) {
                log::debug!("codec module {} is unchanged", path.display());
                continue;
            }
            changed = true;
            match self.describe_module(path, mtime) {
                Ok(entry) => {
                    log::debug!("loaded {} codecs from {}", entry.codecs.len(), path.display());
                    inner.modules.insert(path.clone(), entry);
                }
                Err(e) => {
                    log::warn!("skipping codec module: {}", e);
                    inner.modules.remove(path);
                }
            }
        }

        let present: BTreeSet<&PathBuf> = paths.iter().collect();
        let before = inner.modules.len();
        inner.modules.retain(|path, _| present.contains(path));
        changed |= inner.modules.len() != before;

        if changed {
            self.write_cache(inner)?;
        }
        Ok(())
    }

    fn construct(&self, inner: &mut Inner, info: &CodecInfo, source: Source, format: &StreamFormat) -> Result<Box<dyn Codec>> {
        match source {
            Source::Static(provider, index) => provider.construct(index, format),
            Source::Module(path, index) => {
                let module = match inner.modules.get(&path).and_then(|m| m.module.clone()) {
                    Some(module) => module,
                    None => {
                        let module = self.load_module(&path)?;
                        if let Some(entry) = inner.modules.get_mut(&path) {
                            entry.module = Some(module.clone());
                        }
                        module
                    }
                };
                module.construct(index, info, format)
            }
        }
    }
}

impl CodecLookup for Registry {
    fn find(&self, query: &CodecQuery, direction: Direction) -> Option<CodecInfo> {
        let mut inner = self.lock();
        self.ensure_scanned(&mut inner);
        inner.find(query, direction).map(|(info, _)| info)
    }

    fn bind(&self, query: &CodecQuery, direction: Direction, format: &StreamFormat) -> Result<BoundCodec> {
        let mut inner = self.lock();
        self.ensure_scanned(&mut inner);
        let Some((info, source)) = inner.find(query, direction) else {
            return Err(Error::CodecNotFound { query: query.to_string() });
        };
        let codec = self.construct(&mut inner, &info, source, format)?;
        log::debug!("bound {} for {}", info.name, query);
        Ok(BoundCodec { info, codec })
    }

    fn list(&self, direction: Direction) -> Vec<CodecInfo> {
        let mut inner = self.lock();
        self.ensure_scanned(&mut inner);
        inner
            .entries()
            .into_iter()
            .map(|(info, _)| info)
            .filter(|info| info.direction.supports(direction))
            .collect()
    }
}

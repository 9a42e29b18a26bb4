//! Codec loader
//!
//! Pulls codec descriptions out of a list of plugin factories and keeps the
//! plugins that contributed something loaded for as long as the
//! [`CodecSet`] lives. Plugins that are missing, lack the codec interface
//! or speak another ABI version are skipped; only a missing SBC codec fails
//! the whole load.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info};

/// The stream endpoint protocol allows 0x3E endpoints, so there can't be
/// more codecs than that.
pub const MAX_CODECS: usize = 0x3E;

/// Version of [`CodecInterface`] this loader understands.
pub const CODEC_ABI_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CodecKind {
    Sbc,
    SbcXq,
    Mpeg,
    Aac,
    Aptx,
    AptxHd,
    AptxLl,
    AptxLlDuplex,
    Faststream,
    FaststreamDuplex,
    Ldac,
    Other(u32),
}

impl CodecKind {
    const PREFERENCE: [CodecKind; 11] = [
        CodecKind::Ldac,
        CodecKind::AptxHd,
        CodecKind::Aptx,
        CodecKind::Aac,
        CodecKind::Mpeg,
        CodecKind::Sbc,
        CodecKind::SbcXq,
        CodecKind::Faststream,
        CodecKind::FaststreamDuplex,
        CodecKind::AptxLl,
        CodecKind::AptxLlDuplex,
    ];

    /// Rank in the preference list; unlisted kinds rank last.
    pub fn order(&self) -> usize {
        Self::PREFERENCE
            .iter()
            .position(|k| k == self)
            .unwrap_or(Self::PREFERENCE.len())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Codec {
    pub kind: CodecKind,
    pub name: String,
    /// Endpoint registered for this codec; defaults to `name`.
    pub endpoint_name: Option<String>,
    pub description: String,
}

impl Codec {
    pub fn new(kind: CodecKind, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            kind,
            description: name.clone(),
            name,
            endpoint_name: None,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint_name = Some(endpoint.into());
        self
    }

    pub fn endpoint(&self) -> &str {
        self.endpoint_name.as_deref().unwrap_or(&self.name)
    }
}

/// The interface a codec plugin exposes.
pub trait CodecInterface {
    fn version(&self) -> u32;
    fn codecs(&self) -> Vec<Arc<Codec>>;
}

/// A loaded plugin instance.
pub trait PluginHandle: Send {
    fn factory_name(&self) -> &str;
    /// `None` when the plugin doesn't provide codecs.
    fn codec_interface(&self) -> Option<&dyn CodecInterface>;
}

pub trait PluginLoader: Send + Sync {
    /// `None` when no plugin provides `factory`.
    fn load(&self, factory: &str) -> Option<Box<dyn PluginHandle>>;
    fn unload(&self, handle: Box<dyn PluginHandle>);
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("codec plugin {0} not available")]
    NotAvailable(String),
    #[error("codec plugin {0} has no codec interface")]
    NoInterface(String),
    #[error("codec plugin {factory} has incompatible ABI version ({found} != {expected})")]
    AbiMismatch {
        factory: String,
        found: u32,
        expected: u32,
    },
    #[error("failed to load the SBC codec from plugins")]
    MissingSbc,
}

/// Loaded codecs in preference order, plus the plugins backing them.
/// Dropping the set unloads every plugin.
pub struct CodecSet {
    codecs: Vec<Arc<Codec>>,
    handles: Vec<Box<dyn PluginHandle>>,
    loader: Arc<dyn PluginLoader>,
}

impl fmt::Debug for CodecSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodecSet")
            .field("codecs", &self.codecs)
            .field("handles", &self.handles.len())
            .finish()
    }
}

impl CodecSet {
    /// Load codecs from `factories` in order.
    pub fn load<S: AsRef<str>>(
        loader: Arc<dyn PluginLoader>,
        factories: &[S],
    ) -> Result<Self, CodecError> {
        let mut set = Self {
            codecs: Vec::new(),
            handles: Vec::new(),
            loader,
        };

        for factory in factories {
            if let Err(e) = set.load_from(factory.as_ref()) {
                info!("{}", e);
            }
        }

        if !set.codecs.iter().any(|c| c.kind == CodecKind::Sbc) {
            error!("failed to load SBC codec from plugins");
            return Err(CodecError::MissingSbc);
        }

        set.codecs.sort_by_key(|c| c.kind.order());
        debug!(
            codecs = set.codecs.len(),
            plugins = set.handles.len(),
            "codecs loaded"
        );
        Ok(set)
    }

    fn load_from(&mut self, factory: &str) -> Result<usize, CodecError> {
        let handle = self
            .loader
            .load(factory)
            .ok_or_else(|| CodecError::NotAvailable(factory.to_string()))?;

        debug!(factory, "loading codecs");

        let codecs = match handle.codec_interface() {
            None => Err(CodecError::NoInterface(factory.to_string())),
            Some(iface) if iface.version() != CODEC_ABI_VERSION => Err(CodecError::AbiMismatch {
                factory: factory.to_string(),
                found: iface.version(),
                expected: CODEC_ABI_VERSION,
            }),
            Some(iface) => Ok(iface.codecs()),
        };
        let codecs = match codecs {
            Ok(codecs) => codecs,
            Err(e) => {
                self.loader.unload(handle);
                return Err(e);
            }
        };

        let mut added = 0;
        for codec in codecs {
            if self.codecs.len() >= MAX_CODECS {
                error!(factory, "too many codecs");
                break;
            }
            if self.codecs.iter().any(|c| c.endpoint() == codec.endpoint()) {
                debug!(factory, codec = %codec.name, "duplicate endpoint, skipped");
                continue;
            }
            debug!(factory, codec = %codec.name, "loaded codec");
            self.codecs.push(codec);
            added += 1;
        }

        if added > 0 {
            self.handles.push(handle);
        } else {
            self.loader.unload(handle);
        }
        Ok(added)
    }

    pub fn codecs(&self) -> &[Arc<Codec>] {
        &self.codecs
    }

    pub fn len(&self) -> usize {
        self.codecs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codecs.is_empty()
    }

    /// Plugins kept loaded.
    pub fn plugin_count(&self) -> usize {
        self.handles.len()
    }

    pub fn find(&self, kind: CodecKind) -> Option<&Arc<Codec>> {
        self.codecs.iter().find(|c| c.kind == kind)
    }

    /// Unload every plugin. Same as dropping the set.
    pub fn release(self) {}
}

impl Drop for CodecSet {
    fn drop(&mut self) {
        for handle in self.handles.drain(..) {
            debug!(factory = handle.factory_name(), "unloading codec plugin");
            self.loader.unload(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct FakePlugin {
        version: u32,
        codecs: Vec<Arc<Codec>>,
    }

    impl CodecInterface for FakePlugin {
        fn version(&self) -> u32 {
            self.version
        }

        fn codecs(&self) -> Vec<Arc<Codec>> {
            self.codecs.clone()
        }
    }

    struct FakeHandle {
        factory: String,
        plugin: Option<FakePlugin>,
    }

    impl PluginHandle for FakeHandle {
        fn factory_name(&self) -> &str {
            &self.factory
        }

        fn codec_interface(&self) -> Option<&dyn CodecInterface> {
            self.plugin.as_ref().map(|p| p as &dyn CodecInterface)
        }
    }

    #[derive(Default)]
    struct FakeLoader {
        plugins: HashMap<String, (u32, Option<Vec<Codec>>)>,
        loaded: Mutex<Vec<String>>,
        unloaded: Mutex<Vec<String>>,
    }

    impl FakeLoader {
        fn with(mut self, factory: &str, codecs: Vec<Codec>) -> Self {
            self.plugins
                .insert(factory.to_string(), (CODEC_ABI_VERSION, Some(codecs)));
            self
        }

        fn with_raw(mut self, factory: &str, version: u32, codecs: Option<Vec<Codec>>) -> Self {
            self.plugins.insert(factory.to_string(), (version, codecs));
            self
        }
    }

    impl PluginLoader for FakeLoader {
        fn load(&self, factory: &str) -> Option<Box<dyn PluginHandle>> {
            let (version, codecs) = self.plugins.get(factory)?;
            self.loaded.lock().unwrap().push(factory.to_string());
            Some(Box::new(FakeHandle {
                factory: factory.to_string(),
                plugin: codecs.as_ref().map(|codecs| FakePlugin {
                    version: *version,
                    codecs: codecs.iter().cloned().map(Arc::new).collect(),
                }),
            }))
        }

        fn unload(&self, handle: Box<dyn PluginHandle>) {
            self.unloaded
                .lock()
                .unwrap()
                .push(handle.factory_name().to_string());
        }
    }

    fn kinds(set: &CodecSet) -> Vec<CodecKind> {
        set.codecs().iter().map(|c| c.kind).collect()
    }

    #[test]
    fn test_orders_by_preference() {
        let loader = Arc::new(
            FakeLoader::default()
                .with("codec.sbc", vec![
                    Codec::new(CodecKind::Sbc, "sbc"),
                    Codec::new(CodecKind::SbcXq, "sbc_xq"),
                ])
                .with("codec.aac", vec![Codec::new(CodecKind::Aac, "aac")])
                .with("codec.ldac", vec![Codec::new(CodecKind::Ldac, "ldac")]),
        );
        let set = CodecSet::load(loader, &["codec.sbc", "codec.aac", "codec.ldac"]).unwrap();
        assert_eq!(
            kinds(&set),
            vec![CodecKind::Ldac, CodecKind::Aac, CodecKind::Sbc, CodecKind::SbcXq]
        );
        assert_eq!(set.plugin_count(), 3);
    }

    #[test]
    fn test_unknown_kinds_sort_last_in_load_order() {
        let loader = Arc::new(FakeLoader::default().with("codec.sbc", vec![
            Codec::new(CodecKind::Other(7), "seven"),
            Codec::new(CodecKind::Other(3), "three"),
            Codec::new(CodecKind::Sbc, "sbc"),
        ]));
        let set = CodecSet::load(loader, &["codec.sbc"]).unwrap();
        let names: Vec<&str> = set.codecs().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["sbc", "seven", "three"]);
    }

    #[test]
    fn test_duplicate_endpoints_skipped() {
        let loader = Arc::new(
            FakeLoader::default()
                .with("codec.sbc", vec![Codec::new(CodecKind::Sbc, "sbc")])
                .with("codec.sbc2", vec![
                    Codec::new(CodecKind::Sbc, "sbc_alt").with_endpoint("sbc"),
                ]),
        );
        let set = CodecSet::load(loader.clone(), &["codec.sbc", "codec.sbc2"]).unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.codecs()[0].name, "sbc");
        // Contributed nothing, so it was unloaded right away.
        assert_eq!(set.plugin_count(), 1);
        assert_eq!(*loader.unloaded.lock().unwrap(), vec!["codec.sbc2".to_string()]);
    }

    #[test]
    fn test_skips_missing_interface_and_abi_mismatch() {
        let loader = Arc::new(
            FakeLoader::default()
                .with("codec.sbc", vec![Codec::new(CodecKind::Sbc, "sbc")])
                .with_raw("codec.noiface", CODEC_ABI_VERSION, None)
                .with_raw(
                    "codec.old",
                    CODEC_ABI_VERSION + 1,
                    Some(vec![Codec::new(CodecKind::Ldac, "ldac")]),
                ),
        );
        let set = CodecSet::load(
            loader.clone(),
            &["codec.missing", "codec.noiface", "codec.old", "codec.sbc"],
        )
        .unwrap();
        assert_eq!(kinds(&set), vec![CodecKind::Sbc]);
        let mut unloaded = loader.unloaded.lock().unwrap().clone();
        unloaded.sort();
        assert_eq!(unloaded, vec!["codec.noiface".to_string(), "codec.old".to_string()]);
    }

    #[test]
    fn test_missing_sbc_fails_and_unloads() {
        let loader = Arc::new(
            FakeLoader::default().with("codec.aac", vec![Codec::new(CodecKind::Aac, "aac")]),
        );
        let err = CodecSet::load(loader.clone(), &["codec.aac"]).unwrap_err();
        assert_eq!(err, CodecError::MissingSbc);
        assert_eq!(*loader.unloaded.lock().unwrap(), vec!["codec.aac".to_string()]);
    }

    #[test]
    fn test_caps_codec_count() {
        let many: Vec<Codec> = (0..MAX_CODECS as u32 + 5)
            .map(|i| Codec::new(CodecKind::Other(i), format!("c{i}")))
            .collect();
        let loader = Arc::new(
            FakeLoader::default()
                .with("codec.sbc", vec![Codec::new(CodecKind::Sbc, "sbc")])
                .with("codec.many", many),
        );
        let set = CodecSet::load(loader, &["codec.sbc", "codec.many"]).unwrap();
        assert_eq!(set.len(), MAX_CODECS);
    }

    #[test]
    fn test_release_unloads_every_plugin() {
        let loader = Arc::new(
            FakeLoader::default()
                .with("codec.sbc", vec![Codec::new(CodecKind::Sbc, "sbc")])
                .with("codec.aac", vec![Codec::new(CodecKind::Aac, "aac")]),
        );
        let set = CodecSet::load(loader.clone(), &["codec.aac", "codec.sbc"]).unwrap();
        assert!(loader.unloaded.lock().unwrap().is_empty());
        assert_eq!(loader.loaded.lock().unwrap().len(), 2);

        set.release();
        assert_eq!(loader.unloaded.lock().unwrap().len(), 2);
    }
}

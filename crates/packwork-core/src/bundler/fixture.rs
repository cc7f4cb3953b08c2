//! On-disk projects for bundler unit tests.

use super::graph::{GraphBuilder, ModuleCache, ModuleGraph};
use super::resolve::Resolver;
use super::rules::RuleSet;
use super::stage::StageCatalog;
use crate::config::{BuildContext, Mode};
use std::fs;
use tempfile::TempDir;

pub(crate) struct Project {
    pub dir: TempDir,
    pub ctx: BuildContext,
    pub rules: RuleSet,
    pub resolver: Resolver,
    pub cache: ModuleCache,
}

impl Project {
    pub fn new(files: &[(&str, &str)], mode: Mode) -> Self {
        let dir = TempDir::new().unwrap();
        for (rel, content) in files {
            write_file(&dir, rel, content.as_bytes());
        }
        let ctx = BuildContext::new(dir.path(), mode);
        let rules = RuleSet::defaults(&StageCatalog::builtin(), &ctx).unwrap();
        let resolver = Resolver::new(&ctx);
        Self {
            dir,
            ctx,
            rules,
            resolver,
            cache: ModuleCache::new(),
        }
    }

    pub fn write(&self, rel: &str, content: &[u8]) {
        write_file(&self.dir, rel, content);
    }

    pub fn graph(&self, entries: &[(&str, &str)]) -> ModuleGraph {
        let entries: Vec<(String, String)> = entries
            .iter()
            .map(|(n, s)| ((*n).to_string(), (*s).to_string()))
            .collect();
        GraphBuilder::new(&self.ctx, &self.rules, &self.resolver, &self.cache)
            .build(&entries)
            .unwrap()
    }

    pub fn main_graph(&self) -> ModuleGraph {
        self.graph(&[("main", "./src/main.js")])
    }
}

fn write_file(dir: &TempDir, rel: &str, content: &[u8]) {
    let path = dir.path().join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

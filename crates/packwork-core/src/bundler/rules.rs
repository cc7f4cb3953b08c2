//! Module rules: which stages run for which files.
//!
//! Rules are checked first-to-last and every matching rule contributes its
//! stages. Within one rule the `use` list is declared last-runs-first
//! (`["style", "css", "sass"]` compiles Sass, then normalizes, then injects),
//! so it is reversed when the rule is built.

use super::stage::{Artifact, Stage, StageCatalog, StageContext, StageError, StageUse};
use super::stages;
use crate::config::{BuildContext, RuleConfig, StageConfig};
use crate::error::ConfigError;
use regex_lite::Regex;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Preprocessors with a default rule but no compiler shipped built in.
const EXTERNAL_PREPROCESSORS: [(&str, &str); 2] = [(r"\.less$", "less"), (r"\.styl$", "stylus")];

/// Stands in for a preprocessor nobody registered. Modules reaching it fail
/// instead of being read as plain CSS.
struct UnregisteredStage {
    name: &'static str,
}

impl Stage for UnregisteredStage {
    fn name(&self) -> &str {
        self.name
    }

    fn apply(
        &self,
        _input: Artifact,
        _options: &Value,
        _cx: &StageContext<'_>,
    ) -> Result<Artifact, StageError> {
        Err(StageError::new(ConfigError::UnknownStage {
            name: self.name.to_string(),
        }
        .to_string()))
    }
}

/// How a matching module is treated, overriding extension detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleType {
    /// Inline below the size threshold, separate file otherwise.
    Asset,
    /// Always a separate file.
    AssetResource,
    /// Always a data URL.
    AssetInline,
}

impl ModuleType {
    pub fn parse(name: &str) -> Result<Self, ConfigError> {
        match name {
            "asset" => Ok(Self::Asset),
            "asset/resource" => Ok(Self::AssetResource),
            "asset/inline" => Ok(Self::AssetInline),
            other => Err(ConfigError::UnknownModuleType {
                name: other.to_string(),
            }),
        }
    }
}

/// A compiled rule.
#[derive(Debug, Clone)]
pub struct Rule {
    test: Regex,
    include: Vec<PathBuf>,
    exclude: Vec<PathBuf>,
    /// Execution order.
    stages: Vec<StageUse>,
    module_type: Option<ModuleType>,
    max_inline_size: Option<u64>,
}

impl Rule {
    fn compile(
        config: &RuleConfig,
        catalog: &StageCatalog,
        ctx: &BuildContext,
    ) -> Result<Self, ConfigError> {
        let test = Regex::new(&config.test).map_err(|e| ConfigError::InvalidPattern {
            pattern: config.test.clone(),
            message: e.to_string(),
        })?;
        let stages = config
            .stages
            .iter()
            .rev()
            .map(|s| catalog.bind(s.name(), s.options(), ctx.mode))
            .collect::<Result<Vec<_>, _>>()?;
        let module_type = config
            .module_type
            .as_deref()
            .map(ModuleType::parse)
            .transpose()?;

        Ok(Self {
            test,
            include: config.include.iter().map(|p| root_path(ctx, p)).collect(),
            exclude: config.exclude.iter().map(|p| root_path(ctx, p)).collect(),
            stages,
            module_type,
            max_inline_size: config.max_inline_size,
        })
    }

    /// Whether the rule applies to the absolute module path.
    #[must_use]
    pub fn matches(&self, path: &Path) -> bool {
        let normalized = path.to_string_lossy().replace('\\', "/");
        if !self.test.is_match(&normalized) {
            return false;
        }
        if !self.include.is_empty() && !self.include.iter().any(|r| path.starts_with(r)) {
            return false;
        }
        !self.exclude.iter().any(|r| path.starts_with(r))
    }

    /// Stage names in execution order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(StageUse::name).collect()
    }
}

fn root_path(ctx: &BuildContext, rel: &str) -> PathBuf {
    let joined = ctx.root.join(rel);
    dunce::canonicalize(&joined).unwrap_or(joined)
}

/// Everything the matching rules say about one module.
#[derive(Debug, Default)]
pub struct RuleMatch<'a> {
    /// Stages in execution order across all matching rules.
    pub stages: Vec<&'a StageUse>,
    /// Type from the last matching rule that sets one.
    pub module_type: Option<ModuleType>,
    /// Threshold from the last matching rule that sets one.
    pub max_inline_size: Option<u64>,
}

/// Ordered rule list for a build.
#[derive(Debug, Clone)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    /// Compile configured rules. Unknown stage names and bad patterns fail
    /// here, before any module is touched.
    pub fn from_config(
        configs: &[RuleConfig],
        catalog: &StageCatalog,
        ctx: &BuildContext,
    ) -> Result<Self, ConfigError> {
        let rules = configs
            .iter()
            .map(|c| Rule::compile(c, catalog, ctx))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    /// The default rule set. Less and Stylus files always match a rule;
    /// without a registered compiler they fail with an unknown-stage error.
    pub fn defaults(catalog: &StageCatalog, ctx: &BuildContext) -> Result<Self, ConfigError> {
        let mut catalog = catalog.clone();
        for (_, name) in EXTERNAL_PREPROCESSORS {
            if !catalog.contains(name) {
                catalog.register(name, Arc::new(UnregisteredStage { name }));
            }
        }
        Self::from_config(&default_rules(&catalog, ctx), &catalog, ctx)
    }

    /// Configured rules when present, defaults otherwise.
    pub fn for_project(
        configs: Option<&[RuleConfig]>,
        catalog: &StageCatalog,
        ctx: &BuildContext,
    ) -> Result<Self, ConfigError> {
        match configs {
            Some(configs) => Self::from_config(configs, catalog, ctx),
            None => Self::defaults(catalog, ctx),
        }
    }

    #[must_use]
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Collect stages and overrides from every rule matching `path`.
    #[must_use]
    pub fn matching(&self, path: &Path) -> RuleMatch<'_> {
        let mut matched = RuleMatch::default();
        for rule in self.rules.iter().filter(|r| r.matches(path)) {
            matched.stages.extend(rule.stages.iter());
            if rule.module_type.is_some() {
                matched.module_type = rule.module_type;
            }
            if rule.max_inline_size.is_some() {
                matched.max_inline_size = rule.max_inline_size;
            }
        }
        matched
    }
}

/// Stylesheet chain: terminal style stage, css, then an optional
/// preprocessor (declared last, runs first).
fn style_rule(test: &str, pre: Option<&str>) -> RuleConfig {
    let mut stages = vec![
        StageConfig::Name("style".to_string()),
        StageConfig::Name(stages::CSS.to_string()),
    ];
    if let Some(pre) = pre {
        stages.push(StageConfig::Name(pre.to_string()));
    }
    RuleConfig {
        test: test.to_string(),
        stages,
        ..RuleConfig::default()
    }
}

/// Rules used when the project config has none.
#[must_use]
pub fn default_rules(catalog: &StageCatalog, ctx: &BuildContext) -> Vec<RuleConfig> {
    let [(less_test, less), (styl_test, stylus)] = EXTERNAL_PREPROCESSORS;
    let mut rules = vec![
        style_rule(r"\.css$", None),
        style_rule(less_test, Some(less)),
        style_rule(r"\.s[ac]ss$", Some(stages::SASS)),
        style_rule(styl_test, Some(stylus)),
    ];

    rules.push(RuleConfig {
        test: r"\.(jpe?g|png|gif|webp|svg)$".to_string(),
        module_type: Some("asset".to_string()),
        max_inline_size: Some(ctx.inline_threshold),
        ..RuleConfig::default()
    });
    rules.push(RuleConfig {
        test: r"\.(woff2?|ttf)$".to_string(),
        module_type: Some("asset/resource".to_string()),
        ..RuleConfig::default()
    });

    let mut script_stages = Vec::new();
    if !ctx.mode.is_production() {
        script_stages.push(StageConfig::Name(stages::REFRESH.to_string()));
    }
    if catalog.contains("babel") {
        script_stages.push(StageConfig::Name("babel".to_string()));
    }
    rules.push(RuleConfig {
        test: r"\.jsx?$".to_string(),
        include: vec!["src".to_string()],
        stages: script_stages,
        ..RuleConfig::default()
    });

    rules.push(RuleConfig {
        test: r"\.json$".to_string(),
        stages: vec![StageConfig::Name(stages::JSON.to_string())],
        ..RuleConfig::default()
    });
    rules
}

//! Declarative rewrite rules.
//!
//! Modules carry rule records ([`RuleDef`]) describing transformations to apply while
//! relinking. The relinker never interprets rule bodies itself: a [`RuleRegistry`] maps each
//! record's `kind` to a factory producing a [`RewriteRule`], and a [`RuleSet`] applies the
//! resulting rules in declaration order.
//!
//! # Built-in Rules
//!
//! | Kind | Target | Arguments |
//! |---|---|---|
//! | `redirect-member` | member id to replace | new member id |
//! | `remove-instructions` | `Ns.Type::Method` | start index, count |
//! | `insert-instructions` | `Ns.Type::Method` | index, instruction text... |
//! | `rename-identifier` | `Ns.Type`, `Ns.Type::Method` or member id | new name |
//!
//! Rules targeting a method that does not exist in the module are a no-op, so shared rules
//! can be applied to every mod. Out of range instruction indices are errors.
//!
//! # Custom Rules
//!
//! ```rust,ignore
//! use modscope::relink::rules::{RewriteRule, RuleRegistry};
//!
//! let mut registry = RuleRegistry::with_builtins();
//! registry.register("strip-rules", |def| Ok(Box::new(StripRules::parse(def)?)));
//! ```

use std::{collections::HashMap, fmt::Debug};

use crate::{
    metadata::{
        instruction::Instruction,
        module::{split_type_name, MemberId, ModuleDefinition, RuleDef},
    },
    Error, Result,
};

/// A single transformation applied to a module.
pub trait RewriteRule: Send + Sync + Debug {
    /// Rule kind, used in logs and errors.
    fn name(&self) -> &str;

    /// Apply the rule, returning the number of changed items.
    ///
    /// # Errors
    /// Returns [`crate::Error::Rule`] when the rule cannot be applied to `module`.
    fn apply(&self, module: &mut ModuleDefinition) -> Result<usize>;
}

/// Factory turning a rule record into a rule.
pub type RuleFactory = fn(&RuleDef) -> Result<Box<dyn RewriteRule>>;

/// Registration table from rule kind to factory.
#[derive(Debug, Clone)]
pub struct RuleRegistry {
    factories: HashMap<String, RuleFactory>,
}

impl Default for RuleRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl RuleRegistry {
    /// An empty registry.
    #[must_use]
    pub fn empty() -> Self {
        RuleRegistry {
            factories: HashMap::new(),
        }
    }

    /// A registry with the four built-in rule kinds.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register(RedirectMember::KIND, RedirectMember::create);
        registry.register(RemoveInstructions::KIND, RemoveInstructions::create);
        registry.register(InsertInstructions::KIND, InsertInstructions::create);
        registry.register(RenameIdentifier::KIND, RenameIdentifier::create);
        registry
    }

    /// Register or replace the factory for `kind`.
    pub fn register(&mut self, kind: impl Into<String>, factory: RuleFactory) {
        self.factories.insert(kind.into(), factory);
    }

    /// Returns `true` if `kind` has a registered factory.
    #[must_use]
    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    /// Instantiate the rule described by `def`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Rule`] for an unknown kind or invalid arguments.
    pub fn create(&self, def: &RuleDef) -> Result<Box<dyn RewriteRule>> {
        let factory = self.factories.get(&def.kind).ok_or_else(|| Error::Rule {
            rule: def.kind.clone(),
            message: "unknown rule kind".to_string(),
        })?;
        factory(def)
    }
}

/// An ordered list of parsed rules.
#[derive(Debug, Default)]
pub struct RuleSet {
    rules: Vec<Box<dyn RewriteRule>>,
}

impl RuleSet {
    /// Parse all rule records embedded in `module`.
    ///
    /// # Errors
    /// Returns the first [`crate::Error::Rule`] encountered.
    pub fn parse(module: &ModuleDefinition, registry: &RuleRegistry) -> Result<Self> {
        let rules = module
            .rules
            .iter()
            .map(|def| registry.create(def))
            .collect::<Result<Vec<_>>>()?;
        Ok(RuleSet { rules })
    }

    /// Append the rules of `other`.
    pub fn extend(&mut self, other: RuleSet) {
        self.rules.extend(other.rules);
    }

    /// Number of rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Returns `true` if there are no rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Apply every rule in order, returning the total number of changes.
    ///
    /// # Errors
    /// Stops at and returns the first failing rule's error.
    pub fn apply(&self, module: &mut ModuleDefinition) -> Result<usize> {
        let mut changes = 0;
        for rule in &self.rules {
            let applied = rule.apply(module)?;
            tracing::debug!(target: "relinker", "Rule {} made {} changes", rule.name(), applied);
            changes += applied;
        }
        Ok(changes)
    }
}

fn rule_error(rule: &str, message: impl Into<String>) -> Error {
    Error::Rule {
        rule: rule.to_string(),
        message: message.into(),
    }
}

fn arg<'a>(def: &'a RuleDef, index: usize) -> Result<&'a str> {
    def.args
        .get(index)
        .map(String::as_str)
        .ok_or_else(|| rule_error(&def.kind, format!("missing argument {index}")))
}

fn usize_arg(def: &RuleDef, index: usize) -> Result<usize> {
    let value = arg(def, index)?;
    value
        .parse()
        .map_err(|_| rule_error(&def.kind, format!("argument '{value}' is not an index")))
}

/// Rewrites a member reference to point at another member.
#[derive(Debug)]
pub struct RedirectMember {
    from: String,
    to: MemberId,
}

impl RedirectMember {
    /// Rule kind
    pub const KIND: &'static str = "redirect-member";

    /// Redirect the member identified by `from` to `to`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if `to` is not a valid member identifier.
    pub fn new(from: impl Into<String>, to: &str) -> Result<Self> {
        Ok(RedirectMember {
            from: from.into(),
            to: MemberId::parse(to)?,
        })
    }

    fn create(def: &RuleDef) -> Result<Box<dyn RewriteRule>> {
        Ok(Box::new(Self::new(def.target.clone(), arg(def, 0)?)?))
    }
}

impl RewriteRule for RedirectMember {
    fn name(&self) -> &str {
        Self::KIND
    }

    fn apply(&self, module: &mut ModuleDefinition) -> Result<usize> {
        let Some(index) = module.find_member_ref(&self.from) else {
            return Ok(0);
        };

        let scope = module
            .find_type_ref(&self.to.declaring_type)
            .and_then(|t| module.type_refs[t as usize].scope);
        let parent = module.import_type(&self.to.declaring_type, scope);

        let member = &mut module.member_refs[index as usize];
        member.parent = parent;
        member.name.clone_from(&self.to.name);
        member.return_type.clone_from(&self.to.return_type);
        member.parameters.clone_from(&self.to.parameters);
        Ok(1)
    }
}

/// Removes a contiguous instruction range from a method body.
#[derive(Debug)]
pub struct RemoveInstructions {
    method: String,
    start: usize,
    count: usize,
}

impl RemoveInstructions {
    /// Rule kind
    pub const KIND: &'static str = "remove-instructions";

    /// Remove `count` instructions starting at `start` from `method`.
    #[must_use]
    pub fn new(method: impl Into<String>, start: usize, count: usize) -> Self {
        RemoveInstructions {
            method: method.into(),
            start,
            count,
        }
    }

    fn create(def: &RuleDef) -> Result<Box<dyn RewriteRule>> {
        Ok(Box::new(Self::new(
            def.target.clone(),
            usize_arg(def, 0)?,
            usize_arg(def, 1)?,
        )))
    }
}

impl RewriteRule for RemoveInstructions {
    fn name(&self) -> &str {
        Self::KIND
    }

    fn apply(&self, module: &mut ModuleDefinition) -> Result<usize> {
        let Some(method) = module.find_method_mut(&self.method) else {
            return Ok(0);
        };

        let end = self.start.checked_add(self.count).unwrap_or(usize::MAX);
        if end > method.body.len() {
            return Err(rule_error(
                Self::KIND,
                format!(
                    "range {}..{} out of bounds for {} ({} instructions)",
                    self.start,
                    end,
                    self.method,
                    method.body.len()
                ),
            ));
        }

        method.body.drain(self.start..end);
        Ok(self.count)
    }
}

/// Inserts instructions, given in text form, into a method body.
#[derive(Debug)]
pub struct InsertInstructions {
    method: String,
    index: usize,
    instructions: Vec<String>,
}

impl InsertInstructions {
    /// Rule kind
    pub const KIND: &'static str = "insert-instructions";

    /// Insert `instructions` into `method` before position `index`.
    #[must_use]
    pub fn new(method: impl Into<String>, index: usize, instructions: Vec<String>) -> Self {
        InsertInstructions {
            method: method.into(),
            index,
            instructions,
        }
    }

    fn create(def: &RuleDef) -> Result<Box<dyn RewriteRule>> {
        Ok(Box::new(Self::new(
            def.target.clone(),
            usize_arg(def, 0)?,
            def.args.iter().skip(1).cloned().collect(),
        )))
    }
}

impl RewriteRule for InsertInstructions {
    fn name(&self) -> &str {
        Self::KIND
    }

    fn apply(&self, module: &mut ModuleDefinition) -> Result<usize> {
        let Some(len) = module.find_method_mut(&self.method).map(|m| m.body.len()) else {
            return Ok(0);
        };
        if self.index > len {
            return Err(rule_error(
                Self::KIND,
                format!(
                    "index {} out of bounds for {} ({} instructions)",
                    self.index, self.method, len
                ),
            ));
        }

        let parsed = self
            .instructions
            .iter()
            .map(|text| Instruction::parse(text, module))
            .collect::<Result<Vec<_>>>()?;

        let Some(method) = module.find_method_mut(&self.method) else {
            return Ok(0);
        };
        let count = parsed.len();
        method.body.splice(self.index..self.index, parsed);
        Ok(count)
    }
}

/// Renames a type definition, a method definition or a member reference.
#[derive(Debug)]
pub struct RenameIdentifier {
    target: String,
    new_name: String,
}

impl RenameIdentifier {
    /// Rule kind
    pub const KIND: &'static str = "rename-identifier";

    /// Rename `target` to `new_name`.
    #[must_use]
    pub fn new(target: impl Into<String>, new_name: impl Into<String>) -> Self {
        RenameIdentifier {
            target: target.into(),
            new_name: new_name.into(),
        }
    }

    fn create(def: &RuleDef) -> Result<Box<dyn RewriteRule>> {
        Ok(Box::new(Self::new(def.target.clone(), arg(def, 0)?)))
    }

    fn rename_type(&self, module: &mut ModuleDefinition) -> usize {
        let mut changes = 0;
        let (new_namespace, new_name) = if self.new_name.contains('.') {
            split_type_name(&self.new_name)
        } else {
            (split_type_name(&self.target).0, self.new_name.as_str())
        };

        for ty in module.types.iter_mut().filter(|t| t.full_name() == self.target) {
            ty.namespace = new_namespace.to_string();
            ty.name = new_name.to_string();
            changes += 1;
        }
        for type_ref in module
            .type_refs
            .iter_mut()
            .filter(|t| t.full_name() == self.target)
        {
            type_ref.namespace = new_namespace.to_string();
            type_ref.name = new_name.to_string();
            changes += 1;
        }
        changes
    }

    fn rename_method(&self, module: &mut ModuleDefinition) -> usize {
        let Some((type_name, _)) = self.target.split_once("::") else {
            return 0;
        };
        let type_name = type_name
            .rsplit_once(' ')
            .map_or(type_name, |(_, t)| t)
            .to_string();

        let Some(method) = module.find_method_mut(&self.target) else {
            return 0;
        };
        let old_id = method.id(&type_name);
        method.name.clone_from(&self.new_name);
        let new_id = method.id(&type_name);

        if let Some(symbols) = module.symbols.as_mut() {
            symbols.rename_method(&old_id, &new_id);
        }
        1
    }
}

impl RewriteRule for RenameIdentifier {
    fn name(&self) -> &str {
        Self::KIND
    }

    fn apply(&self, module: &mut ModuleDefinition) -> Result<usize> {
        if !self.target.contains("::") {
            return Ok(self.rename_type(module));
        }

        let renamed = self.rename_method(module);
        if renamed > 0 {
            return Ok(renamed);
        }

        match module.find_member_ref(&self.target) {
            Some(index) => {
                module.member_refs[index as usize].name.clone_from(&self.new_name);
                Ok(1)
            }
            None => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{instruction::OpCode, module::ModuleBuilder};

    fn module() -> ModuleDefinition {
        ModuleBuilder::new("Foo")
            .assembly_ref("Game", "1.0")
            .type_ref("Game", "Celeste.Player")
            .method(
                "Foo.Hooks",
                "OnDie",
                "System.Void",
                &[],
                &[
                    "ldarg 0",
                    "call System.Void Celeste.Player::Die(System.Boolean)",
                    "ret",
                ],
            )
            .with_symbols()
            .build()
            .unwrap()
    }

    #[test]
    fn test_registry_unknown_kind() {
        let registry = RuleRegistry::with_builtins();
        let def = RuleDef {
            kind: "teleport".into(),
            target: String::new(),
            args: vec![],
        };
        assert!(matches!(registry.create(&def), Err(Error::Rule { .. })));
        assert!(registry.contains("redirect-member"));
        assert!(!RuleRegistry::empty().contains("redirect-member"));
    }

    #[test]
    fn test_redirect_member() {
        let mut module = module();
        let rule = RedirectMember::new(
            "System.Void Celeste.Player::Die(System.Boolean)",
            "System.Void Celeste.Player::Kill(System.Boolean,System.Boolean)",
        )
        .unwrap();

        assert_eq!(rule.apply(&mut module).unwrap(), 1);
        assert_eq!(
            module.member_ref_id(0).as_deref(),
            Some("System.Void Celeste.Player::Kill(System.Boolean,System.Boolean)")
        );
        assert_eq!(rule.apply(&mut module).unwrap(), 0);
    }

    #[test]
    fn test_remove_instructions() {
        let mut module = module();
        let rule = RemoveInstructions::new("Foo.Hooks::OnDie", 0, 2);
        assert_eq!(rule.apply(&mut module).unwrap(), 2);
        assert_eq!(module.types[0].methods[0].body.len(), 1);
        assert_eq!(module.types[0].methods[0].body[0].opcode, OpCode::Ret);

        let out_of_range = RemoveInstructions::new("Foo.Hooks::OnDie", 1, 5);
        assert!(out_of_range.apply(&mut module).is_err());

        let missing = RemoveInstructions::new("Foo.Hooks::Missing", 0, 1);
        assert_eq!(missing.apply(&mut module).unwrap(), 0);
    }

    #[test]
    fn test_insert_instructions() {
        let mut module = module();
        let rule = InsertInstructions::new(
            "Foo.Hooks::OnDie",
            2,
            vec![
                "ldstr \"died\"".into(),
                "call System.Void Celeste.Logger::Log(System.String)".into(),
            ],
        );

        assert_eq!(rule.apply(&mut module).unwrap(), 2);
        let body = &module.types[0].methods[0].body;
        assert_eq!(body.len(), 5);
        assert_eq!(body[2].opcode, OpCode::Ldstr);
        assert_eq!(body[4].opcode, OpCode::Ret);
        assert!(module
            .find_member_ref("System.Void Celeste.Logger::Log(System.String)")
            .is_some());

        let bad = InsertInstructions::new("Foo.Hooks::OnDie", 99, vec!["nop".into()]);
        assert!(bad.apply(&mut module).is_err());
    }

    #[test]
    fn test_rename_method_updates_symbols() {
        let mut module = module();
        let rule = RenameIdentifier::new("Foo.Hooks::OnDie", "OnDeath");

        assert_eq!(rule.apply(&mut module).unwrap(), 1);
        assert_eq!(module.types[0].methods[0].name, "OnDeath");
        assert_eq!(
            module.symbols.as_ref().unwrap().methods[0].method,
            "System.Void Foo.Hooks::OnDeath()"
        );
    }

    #[test]
    fn test_rename_type_and_member_ref() {
        let mut module = module();

        let rule = RenameIdentifier::new("Celeste.Player", "Madeline");
        assert_eq!(rule.apply(&mut module).unwrap(), 1);
        assert_eq!(module.type_refs[0].full_name(), "Celeste.Madeline");

        let rule = RenameIdentifier::new(
            "System.Void Celeste.Madeline::Die(System.Boolean)",
            "Perish",
        );
        assert_eq!(rule.apply(&mut module).unwrap(), 1);
        assert_eq!(module.member_refs[0].name, "Perish");
    }

    #[test]
    fn test_rule_set_from_module() {
        let mut module = ModuleBuilder::new("Foo")
            .method("Foo.Hooks", "Run", "System.Void", &[], &["nop", "nop", "ret"])
            .rule("remove-instructions", "Foo.Hooks::Run", &["0", "1"])
            .rule("insert-instructions", "Foo.Hooks::Run", &["0", "ldc.i4 1", "pop"])
            .build()
            .unwrap();

        let rules = RuleSet::parse(&module, &RuleRegistry::default()).unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules.apply(&mut module).unwrap(), 3);
        assert_eq!(module.types[0].methods[0].body.len(), 4);
    }

    #[test]
    fn test_rule_set_bad_arguments() {
        let module = ModuleBuilder::new("Foo")
            .rule("remove-instructions", "Foo.Hooks::Run", &["zero"])
            .build()
            .unwrap();
        assert!(RuleSet::parse(&module, &RuleRegistry::default()).is_err());
    }
}

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use typebleed_core::codepoint::codepoints;
use typebleed_core::config::{SlotConfig, TemplateConfig, TypeBleedConfig};
use typebleed_core::{Codepoint, CodepointRegistry, Result, TypeBleedError};

/// Upper bound on `?` placeholders in one pattern; layouts grow as 2^n.
pub const MAX_OPTIONAL_PLACEHOLDERS: usize = 12;

/// Character class of a placeholder position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CharClass {
    /// `d`
    Digit,
    /// `a`
    Lower,
    /// `A`
    Upper,
    /// `x`
    Alnum,
    /// `*`: anything in the slot alphabet.
    Any,
}

impl CharClass {
    fn from_symbol(symbol: char) -> Option<Self> {
        match symbol {
            'd' => Some(CharClass::Digit),
            'a' => Some(CharClass::Lower),
            'A' => Some(CharClass::Upper),
            'x' => Some(CharClass::Alnum),
            '*' => Some(CharClass::Any),
            _ => None,
        }
    }

    pub fn admits(self, cp: Codepoint) -> bool {
        match self {
            CharClass::Digit => cp.is_ascii_digit(),
            CharClass::Lower => cp.is_lowercase(),
            CharClass::Upper => cp.is_uppercase(),
            CharClass::Alnum => cp.is_alphanumeric(),
            CharClass::Any => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PatternToken {
    Literal(Codepoint),
    Placeholder { class: CharClass, optional: bool },
}

/// Parses a slot pattern such as `€ddd,ddd.dd` or `d?d?d.dd`.
///
/// `d a A x *` are placeholders, a trailing `?` makes the preceding
/// placeholder optional, `\` escapes the next character, and everything else
/// is a literal separator.
pub fn parse_pattern(pattern: &str) -> Result<Vec<PatternToken>> {
    if pattern.is_empty() {
        return Err(TypeBleedError::config("slot pattern must not be empty"));
    }
    let mut tokens = Vec::with_capacity(pattern.len());
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        let token = match c {
            '\\' => match chars.next() {
                Some(escaped) => PatternToken::Literal(escaped.into()),
                None => {
                    return Err(TypeBleedError::config(format!(
                        "pattern {:?} ends with a dangling escape",
                        pattern
                    )))
                }
            },
            '?' => match tokens.last_mut() {
                Some(PatternToken::Placeholder { optional, .. }) if !*optional => {
                    *optional = true;
                    continue;
                }
                _ => {
                    return Err(TypeBleedError::config(format!(
                        "pattern {:?}: '?' must follow a placeholder",
                        pattern
                    )))
                }
            },
            c => match CharClass::from_symbol(c) {
                Some(class) => PatternToken::Placeholder { class, optional: false },
                None => PatternToken::Literal(c.into()),
            },
        };
        tokens.push(token);
    }
    Ok(tokens)
}

/// Format grammar of one dynamic region of a page.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotGrammar {
    name: String,
    pattern: String,
    tokens: Vec<PatternToken>,
    /// Characters a placeholder may take (before class filtering).
    fill_alphabet: BTreeSet<Codepoint>,
    literals: BTreeSet<Codepoint>,
    min_length: usize,
    max_length: usize,
}

impl SlotGrammar {
    /// Builds a slot. Without an explicit `fill_alphabet` every character of
    /// `universe` admitted by one of the pattern's placeholder classes may
    /// fill a placeholder. Length bounds default to the pattern's shortest
    /// and longest rendering and must stay within them.
    pub fn new(
        name: impl Into<String>,
        pattern: &str,
        fill_alphabet: Option<BTreeSet<Codepoint>>,
        universe: &BTreeSet<Codepoint>,
        min_length: Option<usize>,
        max_length: Option<usize>,
    ) -> Result<Self> {
        let name = name.into();
        let tokens = parse_pattern(pattern)?;

        let optional = tokens
            .iter()
            .filter(|t| matches!(t, PatternToken::Placeholder { optional: true, .. }))
            .count();
        if optional > MAX_OPTIONAL_PLACEHOLDERS {
            return Err(TypeBleedError::config(format!(
                "slot {:?}: {} optional placeholders exceed the limit of {}",
                name, optional, MAX_OPTIONAL_PLACEHOLDERS
            )));
        }
        let shortest = tokens.len() - optional;
        let longest = tokens.len();
        let min_length = min_length.unwrap_or(shortest);
        let max_length = max_length.unwrap_or(longest);
        if min_length > max_length || max_length < shortest || min_length > longest {
            return Err(TypeBleedError::config(format!(
                "slot {:?}: length range {}..={} is infeasible for pattern {:?} ({}..={})",
                name, min_length, max_length, pattern, shortest, longest
            )));
        }

        let classes: Vec<CharClass> = tokens
            .iter()
            .filter_map(|t| match t {
                PatternToken::Placeholder { class, .. } => Some(*class),
                PatternToken::Literal(_) => None,
            })
            .collect();
        let fill_alphabet = match fill_alphabet {
            Some(alphabet) => alphabet,
            None => universe
                .iter()
                .copied()
                .filter(|cp| classes.iter().any(|class| class.admits(*cp)))
                .collect(),
        };
        let literals: BTreeSet<Codepoint> = tokens
            .iter()
            .filter_map(|t| match t {
                PatternToken::Literal(cp) => Some(*cp),
                PatternToken::Placeholder { .. } => None,
            })
            .collect();

        let outside: Vec<String> = fill_alphabet
            .union(&literals)
            .filter(|cp| !universe.contains(*cp))
            .map(|cp| cp.display())
            .collect();
        if !outside.is_empty() {
            return Err(TypeBleedError::config(format!(
                "slot {:?} uses characters outside the registered alphabet: {}",
                name,
                outside.join(" ")
            )));
        }

        Ok(Self {
            name,
            pattern: pattern.to_string(),
            tokens,
            fill_alphabet,
            literals,
            min_length,
            max_length,
        })
    }

    fn from_config(config: &SlotConfig, universe: &BTreeSet<Codepoint>) -> Result<Self> {
        Self::new(
            config.name.clone(),
            &config.pattern,
            config.alphabet.as_deref().map(codepoints),
            universe,
            config.min_length,
            config.max_length,
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn tokens(&self) -> &[PatternToken] {
        &self.tokens
    }

    pub fn min_length(&self) -> usize {
        self.min_length
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    pub fn literals(&self) -> &BTreeSet<Codepoint> {
        &self.literals
    }

    /// Every character this slot can render: fill alphabet plus literals.
    pub fn alphabet(&self) -> BTreeSet<Codepoint> {
        self.fill_alphabet.union(&self.literals).copied().collect()
    }

    pub fn can_host(&self, cp: Codepoint) -> bool {
        self.literals.contains(&cp) || self.fill_alphabet.contains(&cp)
    }

    /// Whether `cp` may fill a placeholder of `class` in this slot.
    pub fn fills(&self, class: CharClass, cp: Codepoint) -> bool {
        class.admits(cp) && self.fill_alphabet.contains(&cp)
    }

    /// Fixed-length expansions of the pattern within the length range,
    /// shortest first. Each optional placeholder is either dropped or kept
    /// as a mandatory one.
    pub fn layouts(&self) -> Vec<Vec<PatternToken>> {
        let optional: Vec<usize> = self
            .tokens
            .iter()
            .enumerate()
            .filter(|(_, t)| matches!(t, PatternToken::Placeholder { optional: true, .. }))
            .map(|(i, _)| i)
            .collect();

        let mut layouts: Vec<Vec<PatternToken>> = Vec::new();
        for mask in 0u32..(1u32 << optional.len()) {
            let layout: Vec<PatternToken> = self
                .tokens
                .iter()
                .enumerate()
                .filter_map(|(i, token)| match *token {
                    PatternToken::Placeholder { class, optional: true } => {
                        let bit = optional.iter().position(|&o| o == i)?;
                        (mask & (1 << bit) != 0)
                            .then_some(PatternToken::Placeholder { class, optional: false })
                    }
                    other => Some(other),
                })
                .collect();
            if (self.min_length..=self.max_length).contains(&layout.len())
                && !layouts.contains(&layout)
            {
                layouts.push(layout);
            }
        }
        layouts.sort_by_key(Vec::len);
        layouts
    }
}

/// Static-versus-dynamic character structure of one page.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateModel {
    name: String,
    static_characters: BTreeSet<Codepoint>,
    slots: Vec<SlotGrammar>,
}

impl TemplateModel {
    pub fn new(
        name: impl Into<String>,
        static_characters: BTreeSet<Codepoint>,
        slots: Vec<SlotGrammar>,
    ) -> Self {
        Self {
            name: name.into(),
            static_characters,
            slots,
        }
    }

    pub fn from_config(config: &TemplateConfig, registry: &CodepointRegistry) -> Result<Self> {
        let universe = registry.alphabet();
        if universe.is_empty() {
            return Err(TypeBleedError::config(
                "templates require a registered alphabet",
            ));
        }
        let static_characters = codepoints(&config.static_characters);
        let unknown = registry.unknown_in(&static_characters);
        if !unknown.is_empty() {
            let shown: Vec<String> = unknown.iter().map(|cp| cp.display()).collect();
            return Err(TypeBleedError::config(format!(
                "template {:?} has static characters outside the alphabet: {}",
                config.name,
                shown.join(" ")
            )));
        }
        let slots = config
            .slots
            .iter()
            .map(|slot| SlotGrammar::from_config(slot, universe))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(config.name.clone(), static_characters, slots))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Characters present in every render regardless of dynamic content.
    pub fn static_character_set(&self) -> &BTreeSet<Codepoint> {
        &self.static_characters
    }

    pub fn slots(&self) -> &[SlotGrammar] {
        &self.slots
    }

    /// Union of all slot alphabets.
    pub fn dynamic_alphabet(&self) -> BTreeSet<Codepoint> {
        self.slots.iter().flat_map(|slot| slot.alphabet()).collect()
    }

    pub fn max_dynamic_length(&self) -> usize {
        self.slots.iter().map(SlotGrammar::max_length).sum()
    }

    /// Dynamic characters no slot can account for.
    pub fn unexplained(&self, dynamic: &BTreeSet<Codepoint>) -> BTreeSet<Codepoint> {
        dynamic
            .iter()
            .copied()
            .filter(|cp| !self.slots.iter().any(|slot| slot.can_host(*cp)))
            .collect()
    }

    /// True iff every dynamic codepoint fits some slot and the set fits the
    /// combined slot lengths. Uniqueness of the assignment is not implied.
    pub fn satisfies(&self, dynamic: &BTreeSet<Codepoint>) -> bool {
        self.unexplained(dynamic).is_empty() && dynamic.len() <= self.max_dynamic_length()
    }
}

/// All configured templates, keyed by name. Loaded once at startup.
#[derive(Debug, Clone, Default)]
pub struct TemplateCatalog {
    templates: BTreeMap<String, Arc<TemplateModel>>,
    order: Vec<String>,
}

impl TemplateCatalog {
    pub fn from_config(config: &TypeBleedConfig, registry: &CodepointRegistry) -> Result<Self> {
        let mut catalog = Self::default();
        for template in &config.templates {
            catalog.insert(TemplateModel::from_config(template, registry)?)?;
        }
        tracing::info!("TemplateCatalog: loaded {} templates", catalog.len());
        Ok(catalog)
    }

    pub fn insert(&mut self, template: TemplateModel) -> Result<()> {
        let name = template.name().to_string();
        if self.templates.contains_key(&name) {
            return Err(TypeBleedError::config(format!("duplicate template name {:?}", name)));
        }
        self.order.push(name.clone());
        self.templates.insert(name, Arc::new(template));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<TemplateModel>> {
        self.templates.get(name).cloned()
    }

    /// The first configured template, used when a query names none.
    pub fn default_template(&self) -> Option<Arc<TemplateModel>> {
        self.order.first().and_then(|name| self.get(name))
    }

    /// Looks a template up by name. Without a name this is the default
    /// template, or an empty `raw` one when nothing is configured, so every
    /// captured character counts as dynamic.
    pub fn resolve(&self, name: Option<&str>) -> Option<Arc<TemplateModel>> {
        match name {
            Some(name) => self.get(name),
            None => Some(self.default_template().unwrap_or_else(|| {
                Arc::new(TemplateModel::new("raw", BTreeSet::new(), Vec::new()))
            })),
        }
    }

    pub fn names(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

use crate::profile::{CharacterProfile, Lexicon};
use crate::templates::{PatternToken, SlotGrammar, TemplateModel};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use typebleed_core::codepoint::render;
use typebleed_core::{Codepoint, ReconstructionConfig, Session, SessionId, TypeBleedError};
use typebleed_dsa::Placements;

pub const DEFAULT_MAX_CANDIDATES: usize = 100;
pub const DEFAULT_STEP_BUDGET: usize = 1_000_000;

const COVERAGE_WEIGHT: f64 = 0.6;
const EXACTNESS_WEIGHT: f64 = 0.2;
const TIGHTNESS_WEIGHT: f64 = 0.2;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub text: String,
    pub score: f64,
    pub slot: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconstructionResult {
    pub session_id: SessionId,
    pub template: String,
    pub dynamic_characters: BTreeSet<Codepoint>,
    /// `dynamic_characters` rendered in codepoint order.
    pub dynamic_text: String,
    pub leaked_bits: f64,
    pub candidates: Vec<Candidate>,
    /// Enumeration hit its cap or step budget; more candidates exist.
    pub truncated: bool,
    pub satisfies_template: bool,
    /// Dynamic characters no slot can account for.
    pub unexplained: BTreeSet<Codepoint>,
    pub profile: CharacterProfile,
    pub inferred_words: BTreeMap<String, Vec<String>>,
}

/// `log2(C(n, k))`, the bits revealed by learning which `k` of `n`
/// characters were rendered. Zero when `k > n`.
pub fn leaked_bits(k: usize, n: usize) -> f64 {
    if k > n {
        return 0.0;
    }
    let k = k.min(n - k);
    (1..=k)
        .map(|i| ((n - k + i) as f64).log2() - (i as f64).log2())
        .sum::<f64>()
        .max(0.0)
}

/// Captured characters minus the template's static set.
///
/// Exact set subtraction: a static character that also occurs in the dynamic
/// content is indistinguishable and cannot be recovered.
pub fn dynamic_set(session: &Session, template: &TemplateModel) -> BTreeSet<Codepoint> {
    session
        .captured
        .keys()
        .copied()
        .filter(|cp| !template.static_character_set().contains(cp))
        .collect()
}

/// One fixed-length layout of one slot, ready for enumeration.
#[derive(Debug, Clone)]
struct LayoutPlan {
    slot: usize,
    layout: Vec<PatternToken>,
    choices: Vec<Vec<Codepoint>>,
    required: Vec<Codepoint>,
}

/// A finite, restartable candidate sequence for one dynamic set.
///
/// Building the generator does no enumeration; every call to `iter` starts a
/// fresh lazy walk that stops after `cap` distinct candidates. Layouts are
/// walked tightest slot first, so deduplication keeps the best-scored slot.
#[derive(Debug, Clone)]
pub struct CandidateGenerator {
    dynamic: BTreeSet<Codepoint>,
    slots: Vec<(String, f64)>,
    plans: Vec<LayoutPlan>,
    cap: usize,
    step_budget: usize,
}

impl CandidateGenerator {
    pub fn new(
        dynamic: &BTreeSet<Codepoint>,
        template: &TemplateModel,
        cap: usize,
        step_budget: usize,
    ) -> Self {
        let rendered: BTreeSet<Codepoint> = dynamic
            .union(template.static_character_set())
            .copied()
            .collect();

        // A slot whose separators were never rendered cannot be on screen.
        let compatible: Vec<usize> = template
            .slots()
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.literals().is_subset(&rendered))
            .map(|(i, _)| i)
            .collect();

        let mut plans = Vec::new();
        for &index in &compatible {
            let slot = &template.slots()[index];
            let forced: BTreeSet<Codepoint> = dynamic
                .iter()
                .copied()
                .filter(|cp| slot.can_host(*cp))
                .filter(|cp| {
                    !compatible
                        .iter()
                        .any(|&other| other != index && template.slots()[other].can_host(*cp))
                })
                .collect();

            for layout in slot.layouts() {
                if let Some(plan) = Self::plan(index, slot, layout, dynamic, &forced) {
                    plans.push(plan);
                }
            }
        }

        let slots: Vec<(String, f64)> = template
            .slots()
            .iter()
            .map(|slot| {
                let span = slot.max_length() - slot.min_length();
                (slot.name().to_string(), 1.0 / (1.0 + span as f64))
            })
            .collect();

        // Tighter slots go first: a text produced by several slots is kept
        // from the first one, which then carries the highest score.
        plans.sort_by(|a, b| slots[b.slot].1.total_cmp(&slots[a.slot].1));

        Self {
            dynamic: dynamic.clone(),
            slots,
            plans,
            cap,
            step_budget,
        }
    }

    fn plan(
        index: usize,
        slot: &SlotGrammar,
        layout: Vec<PatternToken>,
        dynamic: &BTreeSet<Codepoint>,
        forced: &BTreeSet<Codepoint>,
    ) -> Option<LayoutPlan> {
        let choices: Vec<Vec<Codepoint>> = layout
            .iter()
            .filter_map(|token| match token {
                PatternToken::Placeholder { class, .. } => Some(
                    dynamic
                        .iter()
                        .copied()
                        .filter(|cp| slot.fills(*class, *cp))
                        .collect(),
                ),
                PatternToken::Literal(_) => None,
            })
            .collect();

        let in_layout: BTreeSet<Codepoint> = layout
            .iter()
            .filter_map(|token| match token {
                PatternToken::Literal(cp) => Some(*cp),
                PatternToken::Placeholder { .. } => None,
            })
            .collect();
        let required: Vec<Codepoint> = forced.difference(&in_layout).copied().collect();

        let placeable = required
            .iter()
            .all(|cp| choices.iter().any(|options| options.contains(cp)));
        if !placeable || required.len() > choices.len() {
            return None;
        }

        Some(LayoutPlan {
            slot: index,
            layout,
            choices,
            required,
        })
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    /// True when no layout of any slot can host the dynamic set.
    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }

    pub fn iter(&self) -> CandidateStream<'_> {
        CandidateStream {
            generator: self,
            next_plan: 0,
            current: None,
            seen: HashSet::new(),
            emitted: 0,
            steps_left: self.step_budget,
            truncated: false,
            finished: false,
        }
    }

    fn score(&self, text: &str, slot: usize) -> f64 {
        let mut counts: HashMap<Codepoint, usize> = HashMap::new();
        for c in text.chars() {
            *counts.entry(c.into()).or_default() += 1;
        }
        let used: Vec<usize> = counts
            .iter()
            .filter(|(cp, _)| self.dynamic.contains(*cp))
            .map(|(_, n)| *n)
            .collect();

        let coverage = if self.dynamic.is_empty() {
            0.0
        } else {
            used.len() as f64 / self.dynamic.len() as f64
        };
        let exactness = if used.is_empty() {
            0.0
        } else {
            used.iter().filter(|&&n| n == 1).count() as f64 / used.len() as f64
        };
        let tightness = self.slots[slot].1;

        COVERAGE_WEIGHT * coverage + EXACTNESS_WEIGHT * exactness + TIGHTNESS_WEIGHT * tightness
    }
}

/// Lazy walk over a `CandidateGenerator`.
///
/// Yields at most `cap` distinct candidates in generation order. After the
/// walk ends, `truncated` tells whether anything was left unexplored.
pub struct CandidateStream<'a> {
    generator: &'a CandidateGenerator,
    next_plan: usize,
    current: Option<(usize, Placements<Codepoint>)>,
    seen: HashSet<String>,
    emitted: usize,
    steps_left: usize,
    truncated: bool,
    finished: bool,
}

impl CandidateStream<'_> {
    pub fn truncated(&self) -> bool {
        self.truncated
    }

    fn next_unique(&mut self) -> Option<Candidate> {
        loop {
            if self.current.is_none() {
                let plan = self.generator.plans.get(self.next_plan)?;
                let placements =
                    Placements::new(plan.choices.clone(), plan.required.clone(), self.steps_left);
                self.current = Some((self.next_plan, placements));
                self.next_plan += 1;
            }
            let (index, placements) = self.current.as_mut()?;
            let plan = &self.generator.plans[*index];

            match placements.next() {
                Some(fill) => {
                    let text = render_layout(&plan.layout, &fill);
                    if self.seen.insert(text.clone()) {
                        let score = self.generator.score(&text, plan.slot);
                        return Some(Candidate {
                            text,
                            score,
                            slot: self.generator.slots[plan.slot].0.clone(),
                        });
                    }
                }
                None => {
                    self.steps_left = self.steps_left.saturating_sub(placements.steps());
                    if placements.is_starved() {
                        self.truncated = true;
                        self.next_plan = self.generator.plans.len();
                    }
                    self.current = None;
                }
            }
        }
    }
}

impl Iterator for CandidateStream<'_> {
    type Item = Candidate;

    fn next(&mut self) -> Option<Candidate> {
        if self.finished {
            return None;
        }
        if self.emitted >= self.generator.cap {
            self.finished = true;
            if self.next_unique().is_some() {
                self.truncated = true;
            }
            return None;
        }
        match self.next_unique() {
            Some(candidate) => {
                self.emitted += 1;
                Some(candidate)
            }
            None => {
                self.finished = true;
                None
            }
        }
    }
}

fn render_layout(layout: &[PatternToken], fill: &[Codepoint]) -> String {
    let mut fill = fill.iter();
    layout
        .iter()
        .filter_map(|token| match token {
            PatternToken::Literal(cp) => cp.to_char(),
            PatternToken::Placeholder { .. } => fill.next().and_then(|cp| cp.to_char()),
        })
        .collect()
}

/// Stateless reconstruction over immutable snapshots.
///
/// ## Lock-Free Reads
/// Every method is a pure function of its arguments, so any number of
/// reconstruction requests may run in parallel without coordination.
#[derive(Debug, Clone)]
pub struct ReconstructionEngine {
    max_candidates: usize,
    step_budget: usize,
    lexicon: Lexicon,
}

impl Default for ReconstructionEngine {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CANDIDATES, DEFAULT_STEP_BUDGET)
    }
}

impl ReconstructionEngine {
    pub fn new(max_candidates: usize, step_budget: usize) -> Self {
        Self {
            max_candidates,
            step_budget,
            lexicon: Lexicon::default(),
        }
    }

    pub fn from_config(config: &ReconstructionConfig) -> Self {
        Self::new(config.max_candidates, config.step_budget)
    }

    pub fn with_lexicon(mut self, lexicon: Lexicon) -> Self {
        self.lexicon = lexicon;
        self
    }

    pub fn max_candidates(&self) -> usize {
        self.max_candidates
    }

    pub fn generator(
        &self,
        dynamic: &BTreeSet<Codepoint>,
        template: &TemplateModel,
    ) -> CandidateGenerator {
        CandidateGenerator::new(dynamic, template, self.max_candidates, self.step_budget)
    }

    /// Ranked candidates (score descending, then text) and the truncation flag.
    pub fn enumerate_candidates(
        &self,
        dynamic: &BTreeSet<Codepoint>,
        template: &TemplateModel,
    ) -> (Vec<Candidate>, bool) {
        let generator = self.generator(dynamic, template);
        let mut stream = generator.iter();
        let mut candidates: Vec<Candidate> = stream.by_ref().collect();
        let truncated = stream.truncated();
        if truncated {
            tracing::warn!(
                "{} (template {:?})",
                TypeBleedError::CandidateOverflow { cap: self.max_candidates },
                template.name()
            );
        }
        candidates.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.text.cmp(&b.text)));
        (candidates, truncated)
    }

    /// Full reconstruction of one session snapshot against one template.
    ///
    /// `alphabet` is the registered alphabet; the entropy model treats every
    /// non-static character of it as equally likely dynamic content.
    pub fn reconstruct(
        &self,
        session: &Session,
        template: &TemplateModel,
        alphabet: &BTreeSet<Codepoint>,
    ) -> ReconstructionResult {
        let dynamic = dynamic_set(session, template);
        let universe = alphabet
            .union(&dynamic)
            .filter(|cp| !template.static_character_set().contains(*cp))
            .count();
        let (candidates, truncated) = self.enumerate_candidates(&dynamic, template);
        let captured = session.codepoints();

        ReconstructionResult {
            session_id: session.id.clone(),
            template: template.name().to_string(),
            dynamic_text: render(&dynamic),
            leaked_bits: leaked_bits(dynamic.len(), universe),
            candidates,
            truncated,
            satisfies_template: template.satisfies(&dynamic),
            unexplained: template.unexplained(&dynamic),
            profile: CharacterProfile::of(&captured),
            inferred_words: self.lexicon.infer(&captured),
            dynamic_characters: dynamic,
        }
    }
}

static_assertions::assert_impl_all!(ReconstructionEngine: Send, Sync);
static_assertions::assert_impl_all!(CandidateGenerator: Send, Sync);

//! SAT solving and exhaustive model enumeration.
//!
//! The [`Solver`] trait is the seam for solver backends. [`Dpll`] is the
//! bundled backend: backtracking with two watched literals per clause, which
//! is plenty for feature-model clause sets where almost every clause is
//! binary. It resumes the search where the previous model was found, so
//! blocking one model and asking for the next is cheap.
//!
//! [`enumerate_models`] implements all-SAT on top of any backend: solve,
//! record the model projected onto the variables of interest, block it with
//! [`blocking_clause`], repeat until unsatisfiable.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::cnf::ClauseSet;
use crate::error::SolverError;
use crate::types::{Lit, Var};

/// A resettable incremental SAT solver.
pub trait Solver {
    /// Forgets all variables and clauses.
    fn reset(&mut self);

    /// Allocates `count` more variables; they are numbered after the existing ones.
    fn new_vars(&mut self, count: u32);

    fn num_vars(&self) -> u32;

    fn add_clause(&mut self, clause: &[Lit]) -> Result<(), SolverError>;

    /// Returns a full assignment (one literal per variable, ascending) or `None` if unsatisfiable.
    fn solve(&mut self) -> Result<Option<Vec<Lit>>, SolverError>;
}

#[derive(Debug, Copy, Clone)]
struct Level {
    /// Trail position of the decision literal.
    start: usize,
    /// The decision has already been tried with the opposite polarity.
    flipped: bool,
}

/// DPLL solver with two watched literals.
///
/// The search is resumable: after a model is returned, the trail is kept. A
/// clause added at that point backjumps just far enough for the clause to be
/// unit or unresolved, so the next [`Solver::solve`] continues from there
/// instead of starting over. All-SAT with blocking clauses then costs a few
/// levels of search per model.
#[derive(Debug, Default)]
pub struct Dpll {
    num_vars: u32,
    /// Clauses of length >= 2; positions 0 and 1 are the watched literals.
    clauses: Vec<Vec<Lit>>,
    units: Vec<Lit>,
    /// Clause indices watching each literal, indexed by literal code.
    watches: Vec<Vec<usize>>,
    values: Vec<Option<bool>>,
    /// Decision level at which each variable was assigned.
    var_levels: Vec<usize>,
    trail: Vec<Lit>,
    levels: Vec<Level>,
    /// Next trail position to propagate.
    head: usize,
    /// The trail holds a search state that later calls continue from.
    searching: bool,
    /// A contradiction was derived at level 0.
    unsat: bool,
}

#[inline]
fn value_of(values: &[Option<bool>], lit: Lit) -> Option<bool> {
    values[lit.var().index()].map(|v| v == lit.is_positive())
}

/// Assigns `lit` true at `level`. Returns false if it is already false.
#[inline]
fn assign(values: &mut [Option<bool>], var_levels: &mut [usize], trail: &mut Vec<Lit>, lit: Lit, level: usize) -> bool {
    match value_of(values, lit) {
        Some(v) => v,
        None => {
            values[lit.var().index()] = Some(lit.is_positive());
            var_levels[lit.var().index()] = level;
            trail.push(lit);
            true
        }
    }
}

impl Dpll {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored clauses, units included.
    pub fn num_clauses(&self) -> usize {
        self.clauses.len() + self.units.len()
    }

    fn assign_now(&mut self, lit: Lit) -> bool {
        let level = self.levels.len();
        assign(&mut self.values, &mut self.var_levels, &mut self.trail, lit, level)
    }

    /// Propagates pending trail literals. Returns false on conflict.
    fn propagate(&mut self) -> bool {
        let level = self.levels.len();
        let Dpll {
            clauses,
            watches,
            values,
            var_levels,
            trail,
            head,
            ..
        } = self;

        while *head < trail.len() {
            let false_lit = -trail[*head];
            *head += 1;

            let mut watchers = std::mem::take(&mut watches[false_lit.code()]);
            let mut i = 0;
            let mut conflict = false;
            while i < watchers.len() {
                let clause = &mut clauses[watchers[i]];
                if clause[0] == false_lit {
                    clause.swap(0, 1);
                }
                let other = clause[0];
                if value_of(values, other) == Some(true) {
                    i += 1;
                    continue;
                }
                if let Some(k) = (2..clause.len()).find(|&k| value_of(values, clause[k]) != Some(false)) {
                    clause.swap(1, k);
                    watches[clause[1].code()].push(watchers[i]);
                    watchers.swap_remove(i);
                    continue;
                }
                if !assign(values, var_levels, trail, other, level) {
                    conflict = true;
                    break;
                }
                i += 1;
            }
            watches[false_lit.code()] = watchers;
            if conflict {
                return false;
            }
        }
        true
    }

    fn undo_to(&mut self, position: usize) {
        for lit in self.trail.drain(position..) {
            self.values[lit.var().index()] = None;
        }
        self.head = position;
    }

    /// Drops every decision level above `level`.
    fn backjump(&mut self, level: usize) {
        if let Some(&Level { start, .. }) = self.levels.get(level) {
            self.levels.truncate(level);
            self.undo_to(start);
        }
    }

    /// Undoes the deepest decision that still has an untried polarity. Returns false when none is left.
    fn backtrack(&mut self) -> bool {
        while let Some(level) = self.levels.pop() {
            let decision = self.trail[level.start];
            self.undo_to(level.start);
            if !level.flipped {
                self.levels.push(Level {
                    start: self.trail.len(),
                    flipped: true,
                });
                self.assign_now(-decision);
                return true;
            }
        }
        false
    }

    /// Assigns the units and propagates at level 0.
    fn start_search(&mut self) {
        self.undo_to(0);
        self.levels.clear();
        self.searching = true;
        for i in 0..self.units.len() {
            let unit = self.units[i];
            if !self.assign_now(unit) {
                self.unsat = true;
                return;
            }
        }
        if !self.propagate() {
            self.unsat = true;
        }
    }

    /// Level at which `lit` is false, or `None` if it is true or unassigned.
    fn false_level(&self, lit: Lit) -> Option<usize> {
        match value_of(&self.values, lit) {
            Some(false) => Some(self.var_levels[lit.var().index()]),
            _ => None,
        }
    }

    /// Registers a clause while a search state is live.
    ///
    /// Afterwards the two watched literals are not false, or the clause is
    /// satisfied by a watch assigned no deeper than the other, or the clause
    /// has just become unit and its last literal is on the trail.
    fn attach_during_search(&mut self, mut lits: Vec<Lit>) {
        if let [unit] = lits[..] {
            // Units live at level 0 so that no backtrack undoes them.
            let settled = value_of(&self.values, unit) == Some(true) && self.var_levels[unit.var().index()] == 0;
            if !settled {
                self.backjump(0);
                if !self.assign_now(unit) {
                    self.unsat = true;
                }
            }
            self.units.push(unit);
            return;
        }

        // Non-false literals first, then false ones from the deepest level down.
        lits.sort_by_key(|&l| std::cmp::Reverse(self.false_level(l).unwrap_or(usize::MAX)));
        match (self.false_level(lits[0]), self.false_level(lits[1])) {
            (None, None) => {}
            (None, Some(level)) => {
                let first = lits[0].var().index();
                if self.values[first].is_none() || self.var_levels[first] > level {
                    self.backjump(level);
                    self.assign_now(lits[0]);
                }
            }
            (Some(0), _) => {
                self.unsat = true;
            }
            (Some(deepest), Some(next)) if deepest > next => {
                self.backjump(next);
                self.assign_now(lits[0]);
            }
            (Some(deepest), _) => {
                // Two literals share the deepest level; both become unassigned.
                self.backjump(deepest - 1);
            }
        }
        self.watch(lits);
    }

    fn watch(&mut self, lits: Vec<Lit>) {
        let index = self.clauses.len();
        self.watches[lits[0].code()].push(index);
        self.watches[lits[1].code()].push(index);
        self.clauses.push(lits);
    }

    fn model(&self) -> Vec<Lit> {
        self.values
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let var = Var::new(i as u32 + 1);
                if *v == Some(true) {
                    var.pos()
                } else {
                    var.neg()
                }
            })
            .collect()
    }
}

impl Solver for Dpll {
    fn reset(&mut self) {
        *self = Dpll::default();
    }

    fn new_vars(&mut self, count: u32) {
        self.num_vars += count;
        self.values.resize(self.num_vars as usize, None);
        self.var_levels.resize(self.num_vars as usize, 0);
        self.watches.resize(2 * self.num_vars as usize, Vec::new());
    }

    fn num_vars(&self) -> u32 {
        self.num_vars
    }

    fn add_clause(&mut self, clause: &[Lit]) -> Result<(), SolverError> {
        if clause.is_empty() {
            return Err(SolverError::EmptyClause);
        }
        if let Some(&lit) = clause.iter().find(|l| l.var().id() > self.num_vars) {
            return Err(SolverError::UnknownVariable {
                literal: lit.to_dimacs(),
                num_vars: self.num_vars,
            });
        }

        let mut lits = clause.to_vec();
        lits.sort_unstable_by_key(|l| (l.var(), l.is_positive()));
        lits.dedup();
        if lits.windows(2).any(|w| w[0].var() == w[1].var()) {
            // Tautology
            return Ok(());
        }

        if self.searching && !self.unsat {
            self.attach_during_search(lits);
        } else if let [unit] = lits[..] {
            self.units.push(unit);
        } else {
            self.watch(lits);
        }
        Ok(())
    }

    fn solve(&mut self) -> Result<Option<Vec<Lit>>, SolverError> {
        if !self.searching {
            self.start_search();
        }
        if self.unsat {
            return Ok(None);
        }

        loop {
            if !self.propagate() {
                if !self.backtrack() {
                    self.unsat = true;
                    return Ok(None);
                }
                continue;
            }
            match self.values.iter().position(Option::is_none) {
                None => return Ok(Some(self.model())),
                Some(index) => {
                    self.levels.push(Level {
                        start: self.trail.len(),
                        flipped: false,
                    });
                    self.assign_now(Var::new(index as u32 + 1).neg());
                }
            }
        }
    }
}

/// External cancellation for long-running enumerations and merges.
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    flag: Option<Arc<AtomicBool>>,
    deadline: Option<Instant>,
}

impl Interrupt {
    /// Never triggers.
    pub fn none() -> Self {
        Self::default()
    }

    /// Triggers once `flag` is set.
    pub fn with_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.flag = Some(flag);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.as_ref().is_some_and(|f| f.load(Ordering::Relaxed))
            || self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

/// Result of an all-SAT run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Enumeration {
    /// Projected models, one literal per projection variable.
    pub models: Vec<Vec<Lit>>,
    /// False if the run was interrupted before the model space was exhausted.
    pub complete: bool,
}

impl Enumeration {
    /// Positive variables of each model.
    pub fn selections(&self) -> impl Iterator<Item = Vec<Var>> + '_ {
        self.models
            .iter()
            .map(|m| m.iter().filter(|l| l.is_positive()).map(|l| l.var()).collect())
    }
}

/// The clause forbidding exactly the assignment `model`.
pub fn blocking_clause(model: &[Lit]) -> Vec<Lit> {
    model.iter().map(|&lit| -lit).collect()
}

/// Restricts a full assignment to `projection`; variables outside the assignment are skipped.
pub fn project(model: &[Lit], projection: &[Var]) -> Vec<Lit> {
    projection.iter().filter_map(|v| model.get(v.index()).copied()).collect()
}

/// Enumerates every model of `clauses`, distinct on `projection`.
///
/// The solver is reset first. Every returned model satisfies `clauses`, and no
/// two returned models agree on all projection variables.
pub fn enumerate_models<S: Solver + ?Sized>(
    solver: &mut S,
    clauses: &ClauseSet,
    projection: &[Var],
    interrupt: &Interrupt,
) -> Result<Enumeration, SolverError> {
    solver.reset();
    solver.new_vars(clauses.header().max_literal);
    for clause in clauses.clauses() {
        solver.add_clause(clause)?;
    }

    let mut models = Vec::new();
    loop {
        if interrupt.is_triggered() {
            warn!("enumeration interrupted after {} models", models.len());
            return Ok(Enumeration { models, complete: false });
        }
        let Some(model) = solver.solve()? else {
            break;
        };
        let projected = project(&model, projection);
        let blocking = blocking_clause(&projected);
        models.push(projected);
        if blocking.is_empty() {
            break;
        }
        solver.add_clause(&blocking)?;
        if models.len() % 10_000 == 0 {
            debug!("enumerated {} models so far", models.len());
        }
    }
    Ok(Enumeration { models, complete: true })
}

#[cfg(test)]
mod tests {
    use super::*;

    use test_log::test;

    fn lits(values: &[i32]) -> Vec<Lit> {
        values.iter().map(|&v| Lit::from_dimacs(v).unwrap()).collect()
    }

    fn clause_set(clauses: &[&[i32]]) -> ClauseSet {
        let mut set = ClauseSet::new();
        for c in clauses {
            set.push(lits(c));
        }
        set
    }

    fn satisfies(model: &[Lit], clauses: &ClauseSet) -> bool {
        clauses.clauses().iter().all(|c| c.iter().any(|l| model.contains(l)))
    }

    fn vars(ids: &[u32]) -> Vec<Var> {
        ids.iter().map(|&i| Var::new(i)).collect()
    }

    #[test]
    fn test_blocking_clause_negates_model() {
        assert_eq!(blocking_clause(&lits(&[1, -2, 3])), lits(&[-1, 2, -3]));
        assert!(blocking_clause(&[]).is_empty());
    }

    #[test]
    fn test_project() {
        let model = lits(&[1, -2, 3, -4]);
        assert_eq!(project(&model, &vars(&[2, 3])), lits(&[-2, 3]));
        assert_eq!(project(&model, &vars(&[9])), Vec::<Lit>::new());
    }

    #[test]
    fn test_solve_simple() {
        let mut solver = Dpll::new();
        solver.new_vars(3);
        solver.add_clause(&lits(&[1])).unwrap();
        solver.add_clause(&lits(&[-1, 2])).unwrap();
        solver.add_clause(&lits(&[-2, -3])).unwrap();
        let model = solver.solve().unwrap().unwrap();
        assert_eq!(model, lits(&[1, 2, -3]));
    }

    #[test]
    fn test_unsat() {
        let mut solver = Dpll::new();
        solver.new_vars(2);
        for c in [&[1, 2][..], &[1, -2], &[-1, 2], &[-1, -2]] {
            solver.add_clause(&lits(c)).unwrap();
        }
        assert_eq!(solver.solve().unwrap(), None);
    }

    #[test]
    fn test_contradicting_units_are_unsat_not_errors() {
        let mut solver = Dpll::new();
        solver.new_vars(1);
        solver.add_clause(&lits(&[1])).unwrap();
        solver.add_clause(&lits(&[-1])).unwrap();
        assert_eq!(solver.solve().unwrap(), None);
    }

    #[test]
    fn test_registration_errors() {
        let mut solver = Dpll::new();
        solver.new_vars(2);
        assert!(matches!(solver.add_clause(&[]), Err(SolverError::EmptyClause)));
        assert!(matches!(
            solver.add_clause(&lits(&[1, -3])),
            Err(SolverError::UnknownVariable { literal: -3, num_vars: 2 })
        ));
    }

    #[test]
    fn test_tautology_is_ignored() {
        let mut solver = Dpll::new();
        solver.new_vars(1);
        solver.add_clause(&lits(&[1, -1])).unwrap();
        assert_eq!(solver.num_clauses(), 0);
    }

    #[test]
    fn test_enumerate_alternative_group() {
        // root, parent forced, exactly one of 3, 4, 5
        let set = clause_set(&[
            &[1],
            &[2],
            &[3, 4, 5, -2],
            &[-3, -4],
            &[-3, -5],
            &[-4, -5],
            &[-3, 2],
            &[-4, 2],
            &[-5, 2],
        ]);
        let mut solver = Dpll::new();
        let result = enumerate_models(&mut solver, &set, &vars(&[3, 4, 5]), &Interrupt::none()).unwrap();
        assert!(result.complete);
        assert_eq!(result.models.len(), 3);
        for selection in result.selections() {
            assert_eq!(selection.len(), 1);
        }
    }

    #[test]
    fn test_enumerate_is_exact() {
        // OR group of 3 under a free parent: 7 models with parent, 1 without.
        let set = clause_set(&[&[2, 3, 4, -1], &[-2, 1], &[-3, 1], &[-4, 1]]);
        let projection = vars(&[1, 2, 3, 4]);
        let mut solver = Dpll::new();
        let result = enumerate_models(&mut solver, &set, &projection, &Interrupt::none()).unwrap();
        assert_eq!(result.models.len(), 8);
        for (i, model) in result.models.iter().enumerate() {
            assert!(satisfies(model, &set));
            assert!(!result.models[i + 1..].contains(model));
        }
    }

    #[test]
    fn test_projection_collapses_models() {
        let set = clause_set(&[&[1, 2]]);
        let mut solver = Dpll::new();
        let result = enumerate_models(&mut solver, &set, &vars(&[1]), &Interrupt::none()).unwrap();
        assert_eq!(result.models.len(), 2);
    }

    #[test]
    fn test_empty_projection_yields_single_model() {
        let set = clause_set(&[&[1]]);
        let mut solver = Dpll::new();
        let result = enumerate_models(&mut solver, &set, &[], &Interrupt::none()).unwrap();
        assert_eq!(result.models, vec![Vec::<Lit>::new()]);
    }

    #[test]
    fn test_interrupt_abandons_enumeration() {
        let flag = Arc::new(AtomicBool::new(true));
        let set = clause_set(&[&[1, 2]]);
        let mut solver = Dpll::new();
        let interrupt = Interrupt::none().with_flag(flag);
        let result = enumerate_models(&mut solver, &set, &vars(&[1, 2]), &interrupt).unwrap();
        assert!(!result.complete);
        assert!(result.models.is_empty());
    }

    #[test]
    fn test_expired_deadline() {
        let interrupt = Interrupt::none().with_deadline(Instant::now());
        assert!(interrupt.is_triggered());
        assert!(!Interrupt::none().with_timeout(Duration::from_secs(3600)).is_triggered());
    }

    #[test]
    fn test_solver_is_reusable_after_reset() {
        let mut solver = Dpll::new();
        solver.new_vars(1);
        solver.add_clause(&lits(&[-1])).unwrap();
        assert_eq!(solver.solve().unwrap(), Some(lits(&[-1])));
        solver.reset();
        assert_eq!(solver.num_vars(), 0);
        solver.new_vars(1);
        solver.add_clause(&lits(&[1])).unwrap();
        assert_eq!(solver.solve().unwrap(), Some(lits(&[1])));
    }

    #[test]
    fn test_enumerate_ten_thousand_models() {
        // Four independent exactly-one groups of ten variables each.
        let mut set = ClauseSet::new();
        for group in 0..4 {
            let members: Vec<i32> = (1..=10).map(|i| group * 10 + i).collect();
            set.push(lits(&members));
            for (i, &a) in members.iter().enumerate() {
                for &b in &members[i + 1..] {
                    set.push(lits(&[-a, -b]));
                }
            }
        }
        let projection: Vec<Var> = (1..=40).map(Var::new).collect();
        let mut solver = Dpll::new();
        let result = enumerate_models(&mut solver, &set, &projection, &Interrupt::none()).unwrap();
        assert!(result.complete);
        assert_eq!(result.models.len(), 10_000);

        let distinct: std::collections::HashSet<&Vec<Lit>> = result.models.iter().collect();
        assert_eq!(distinct.len(), 10_000);
        for selection in result.selections() {
            assert_eq!(selection.len(), 4);
        }
    }

    #[test]
    fn test_clause_added_after_model_is_respected() {
        let mut solver = Dpll::new();
        solver.new_vars(3);
        solver.add_clause(&lits(&[1, 2, 3])).unwrap();
        let first = solver.solve().unwrap().unwrap();
        assert_eq!(first, lits(&[-1, -2, 3]));

        // Unit on a variable decided deep in the search.
        solver.add_clause(&lits(&[-3])).unwrap();
        let second = solver.solve().unwrap().unwrap();
        assert!(second.contains(&Var::new(3).neg()));
        assert!(second.contains(&Var::new(1).pos()) || second.contains(&Var::new(2).pos()));

        solver.add_clause(&lits(&[-1])).unwrap();
        solver.add_clause(&lits(&[-2])).unwrap();
        assert_eq!(solver.solve().unwrap(), None);
        // Stays unsatisfiable until reset.
        assert_eq!(solver.solve().unwrap(), None);
    }

    #[test]
    fn test_resumed_search_matches_fresh_search() {
        let set = clause_set(&[&[1, 2, 3], &[-1, 4], &[-2, -4], &[3, 4, 5]]);
        let projection = vars(&[1, 2, 3, 4, 5]);
        let mut solver = Dpll::new();
        let result = enumerate_models(&mut solver, &set, &projection, &Interrupt::none()).unwrap();

        let mut expected = 0;
        for bits in 0u32..32 {
            let model: Vec<Lit> = (1..=5)
                .map(|i| if bits >> (i - 1) & 1 == 1 { Var::new(i).pos() } else { Var::new(i).neg() })
                .collect();
            if satisfies(&model, &set) {
                expected += 1;
                assert!(result.models.contains(&model));
            }
        }
        assert_eq!(result.models.len(), expected);
    }
}

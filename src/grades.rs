/// The fixed grade ladder, lowest first. A student's grade is always one of
/// these labels; the grade after the last one is graduation, not a label.
pub const GRADE_SEQUENCE: [&str; 9] = [
    "Nursery", "L.K.G.", "U.K.G.", "1", "2", "3", "4", "5", "6",
];

/// Sentinel label used in summaries for students leaving the ladder.
pub const GRADUATED: &str = "Graduated";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progression {
    /// Students advance to this grade.
    Advances(&'static str),
    /// Terminal grade: students graduate and leave the active roster.
    Graduates,
}

/// Match an incoming grade label against the fixed sequence. Trims and
/// compares case-insensitively so "nursery" and "Nursery " both resolve,
/// but anything outside the ladder is rejected.
pub fn normalize(label: &str) -> Option<&'static str> {
    let wanted = label.trim();
    GRADE_SEQUENCE
        .iter()
        .find(|g| g.eq_ignore_ascii_case(wanted))
        .copied()
}

pub fn is_terminal(grade: &str) -> bool {
    GRADE_SEQUENCE.last().map(|g| *g == grade).unwrap_or(false)
}

/// Successor lookup. Returns None for labels outside the sequence; callers
/// must reject the whole request in that case before touching the store.
pub fn successor(grade: &str) -> Option<Progression> {
    let idx = GRADE_SEQUENCE.iter().position(|g| *g == grade)?;
    if idx + 1 == GRADE_SEQUENCE.len() {
        Some(Progression::Graduates)
    } else {
        Some(Progression::Advances(GRADE_SEQUENCE[idx + 1]))
    }
}

/// Display form of the grade a cohort moves to.
pub fn successor_label(grade: &str) -> Option<&'static str> {
    match successor(grade)? {
        Progression::Advances(next) => Some(next),
        Progression::Graduates => Some(GRADUATED),
    }
}

/// Promote-all processing order: terminal grade first, then downwards.
/// A cohort promoted into a grade later in the pass would otherwise be
/// promoted twice.
pub fn promotion_order() -> impl Iterator<Item = &'static str> {
    GRADE_SEQUENCE.iter().rev().copied()
}

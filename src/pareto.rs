//! Pareto ranking for the multi-objective policy
//!
//! Fast non-dominated sorting and crowding distance (Deb et al., "A Fast and
//! Elitist Multiobjective Genetic Algorithm: NSGA-II", 2002), operating on
//! the objective vectors of evaluated candidates. All objectives are
//! minimised.

use crate::population::EvaluatedCandidate;
use std::cmp::Ordering;

/// True if `a` is no worse than `b` everywhere and strictly better somewhere
pub fn dominates(a: &[f64], b: &[f64]) -> bool {
    let mut strictly_better = false;
    for (x, y) in a.iter().zip(b.iter()) {
        if x > y {
            return false;
        }
        if x < y {
            strictly_better = true;
        }
    }
    strictly_better
}

/// Assign Pareto ranks in place (0 = non-dominated front)
pub fn non_dominated_sort(members: &mut [EvaluatedCandidate]) {
    let n = members.len();
    for m in members.iter_mut() {
        m.rank = usize::MAX;
    }

    let mut domination_count = vec![0usize; n];
    let mut dominated: Vec<Vec<usize>> = vec![Vec::new(); n];

    for i in 0..n {
        for j in (i + 1)..n {
            if dominates(members[i].objectives(), members[j].objectives()) {
                dominated[i].push(j);
                domination_count[j] += 1;
            } else if dominates(members[j].objectives(), members[i].objectives()) {
                dominated[j].push(i);
                domination_count[i] += 1;
            }
        }
    }

    let mut front: Vec<usize> = (0..n).filter(|&i| domination_count[i] == 0).collect();
    let mut rank = 0;
    while !front.is_empty() {
        let mut next = Vec::new();
        for &i in &front {
            members[i].rank = rank;
            for &j in &dominated[i] {
                domination_count[j] -= 1;
                if domination_count[j] == 0 {
                    next.push(j);
                }
            }
        }
        rank += 1;
        front = next;
    }
}

/// Crowding distance per front; boundary members get infinity
pub fn assign_crowding_distance(members: &mut [EvaluatedCandidate]) {
    for m in members.iter_mut() {
        m.crowding_distance = 0.0;
    }
    let Some(max_rank) = members.iter().map(|m| m.rank).filter(|r| *r != usize::MAX).max() else {
        return;
    };
    let n_obj = members.iter().map(|m| m.objectives().len()).min().unwrap_or(0);

    for rank in 0..=max_rank {
        let mut front: Vec<usize> = (0..members.len()).filter(|&i| members[i].rank == rank).collect();

        if front.len() <= 2 {
            for &i in &front {
                members[i].crowding_distance = f64::INFINITY;
            }
            continue;
        }

        for m in 0..n_obj {
            front.sort_by(|&a, &b| members[a].objectives()[m].total_cmp(&members[b].objectives()[m]));

            let first = front[0];
            let last = front[front.len() - 1];
            members[first].crowding_distance = f64::INFINITY;
            members[last].crowding_distance = f64::INFINITY;

            let f_min = members[first].objectives()[m];
            let f_max = members[last].objectives()[m];
            let range = if (f_max - f_min).abs() > 1e-12 { f_max - f_min } else { 1.0 };

            for k in 1..(front.len() - 1) {
                let prev = members[front[k - 1]].objectives()[m];
                let next = members[front[k + 1]].objectives()[m];
                members[front[k]].crowding_distance += (next - prev) / range;
            }
        }
    }
}

/// Crowded-comparison order: lower rank first, then larger crowding distance
pub fn crowded_cmp(a: &EvaluatedCandidate, b: &EvaluatedCandidate) -> Ordering {
    a.rank
        .cmp(&b.rank)
        .then_with(|| b.crowding_distance.total_cmp(&a.crowding_distance))
}

/// Rank, compute crowding and sort best-first by crowded comparison
pub fn rank_and_sort(members: &mut Vec<EvaluatedCandidate>) {
    non_dominated_sort(members);
    assign_crowding_distance(members);
    members.sort_by(crowded_cmp);
}

/// NSGA-II environmental selection: keep the best `n` of `combined`
pub fn environmental_selection(mut combined: Vec<EvaluatedCandidate>, n: usize) -> Vec<EvaluatedCandidate> {
    rank_and_sort(&mut combined);
    combined.truncate(n);
    // Crowding of the survivors is relative to the survivors
    rank_and_sort(&mut combined);
    combined
}

/// Non-dominated members, ordered by the first objective
pub fn first_front(members: &[EvaluatedCandidate]) -> Vec<EvaluatedCandidate> {
    let mut front: Vec<EvaluatedCandidate> = members.iter().filter(|m| m.rank == 0).cloned().collect();
    front.sort_by(|a, b| a.cmp_fitness(b));
    front
}

/// 2-D hypervolume dominated by `front` and bounded by `reference`.
///
/// Points not strictly better than the reference in both objectives
/// contribute nothing.
pub fn hypervolume_2d(front: &[EvaluatedCandidate], reference: (f64, f64)) -> f64 {
    let mut points: Vec<(f64, f64)> = front
        .iter()
        .filter(|m| m.objectives().len() >= 2)
        .map(|m| (m.objectives()[0], m.objectives()[1]))
        .filter(|(f1, f2)| *f1 < reference.0 && *f2 < reference.1)
        .collect();
    points.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.total_cmp(&b.1)));

    let mut volume = 0.0;
    let mut ceiling = reference.1;
    for (f1, f2) in points {
        if f2 < ceiling {
            volume += (reference.0 - f1) * (ceiling - f2);
            ceiling = f2;
        }
    }
    volume
}

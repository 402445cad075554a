//! 2-opt tour improvement

use super::matrix::TravelTimeMatrix;

/// Change in route length from reversing `sequence[i..=j]`
///
/// Costs are directed, so the reversed interior is re-read as well.
fn reversal_delta(sequence: &[usize], matrix: &TravelTimeMatrix, i: usize, j: usize) -> i128 {
    let cost = |from: usize, to: usize| matrix.get(sequence[from], sequence[to]) as i128;

    let mut before = cost(i - 1, i) + cost(j, j + 1);
    let mut after = cost(i - 1, j) + cost(i, j + 1);
    for k in i..j {
        before += cost(k, k + 1);
        after += cost(k + 1, k);
    }

    after - before
}

/// Improve a depot-first route in place; returns the number of reversals
///
/// Scans segment bounds `1 <= i < j <= len - 2` and reverses any segment
/// that shortens the route, until a full scan finds nothing or
/// `max_iterations` scans have run. The depot and the final stop stay put.
pub fn improve_route(sequence: &mut [usize], matrix: &TravelTimeMatrix, max_iterations: usize) -> usize {
    let len = sequence.len();
    if len < 4 {
        return 0;
    }

    let mut reversals = 0;
    for _ in 0..max_iterations {
        let mut improved = false;
        for i in 1..len - 2 {
            for j in i + 1..len - 1 {
                if reversal_delta(sequence, matrix, i, j) < 0 {
                    sequence[i..=j].reverse();
                    reversals += 1;
                    improved = true;
                }
            }
        }
        if !improved {
            break;
        }
    }

    reversals
}

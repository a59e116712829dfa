//! Mass distribution for popped player cells
//!
//! When a cell pops on a virus the freed mass has to be dealt out to new
//! cells without exceeding the owner's cell budget or producing pieces
//! below the minimum split size. Three regimes:
//!
//! * monotone: equal pieces, as many as fit the budget
//! * small mass: power-of-two piece counts while each stays above minimum
//! * large mass: greedy halving, then the remainder spread evenly

/// Plan the piece masses for a popped cell.
///
/// `mass` is the popping cell's mass (r^2 / 100), `cells_left` the
/// owner's remaining cell budget, `split_min_mass` the smallest piece
/// allowed. The popping cell keeps `mass - sum(pieces)`.
pub fn distribute_cell_mass(
    mass: f32,
    cells_left: usize,
    split_min_mass: f32,
    monotone: bool,
) -> Vec<f32> {
    if cells_left == 0 {
        return Vec::new();
    }

    if monotone {
        let amount = ((mass / split_min_mass).floor() as usize).min(cells_left);
        let per_piece = mass / (amount as f32 + 1.0);
        return vec![per_piece; amount];
    }

    if mass / (cells_left as f32) < split_min_mass {
        let mut amount = 2usize;
        let mut per_piece = mass / (amount as f32 + 1.0);
        while mass / (amount as f32 * 2.0 + 1.0) >= split_min_mass && amount * 2 <= cells_left {
            amount *= 2;
            per_piece = mass / (amount as f32 + 1.0);
        }
        if per_piece < split_min_mass {
            return Vec::new();
        }
        return vec![per_piece; amount];
    }

    let mut splits = Vec::new();
    let mut cells_left = cells_left;
    let mut next_mass = mass / 2.0;
    let mut mass_left = mass / 2.0;
    while cells_left > 0 {
        if next_mass / (cells_left as f32) < split_min_mass {
            break;
        }
        while next_mass >= mass_left && cells_left > 1 {
            next_mass /= 2.0;
        }
        splits.push(next_mass);
        mass_left -= next_mass;
        cells_left -= 1;
    }
    // Spread what is left over the unused budget, but never dip a piece
    // below the minimum; undersized leftover stays with the popping cell.
    let slots = cells_left.min((mass_left / split_min_mass).floor() as usize);
    if slots > 0 {
        let remainder = mass_left / slots as f32;
        splits.extend(std::iter::repeat(remainder).take(slots));
    }
    splits
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPLIT_MIN: f32 = 36.0; // 60^2 / 100

    #[test]
    fn test_no_budget_no_pieces() {
        assert!(distribute_cell_mass(10_000.0, 0, SPLIT_MIN, false).is_empty());
    }

    #[test]
    fn test_monotone_equal_pieces() {
        let splits = distribute_cell_mass(400.0, 15, SPLIT_MIN, true);
        // floor(400 / 36) = 11 pieces of 400 / 12
        assert_eq!(splits.len(), 11);
        for &m in &splits {
            assert!((m - 400.0 / 12.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_monotone_caps_at_budget() {
        let splits = distribute_cell_mass(4_000.0, 7, SPLIT_MIN, true);
        assert_eq!(splits.len(), 7);
        assert!((splits[0] - 500.0).abs() < 1e-3);
    }

    #[test]
    fn test_small_mass_power_of_two() {
        // mass per budget slot below minimum: piece count doubles from 2
        // while pieces stay above the minimum
        let splits = distribute_cell_mass(300.0, 15, SPLIT_MIN, false);
        assert!(splits.len().is_power_of_two());
        for &m in &splits {
            assert!(m >= SPLIT_MIN, "piece {m} under minimum");
        }
        let handed_out: f32 = splits.iter().sum();
        assert!(handed_out < 300.0, "popping cell keeps a share");
    }

    #[test]
    fn test_large_mass_greedy_halving() {
        let mass = 50_000.0;
        let splits = distribute_cell_mass(mass, 15, SPLIT_MIN, false);
        assert!(!splits.is_empty() && splits.len() <= 15);
        // big pieces first, halving down
        for w in splits.windows(2) {
            assert!(w[0] >= w[1] - 1e-3);
        }
        let handed_out: f32 = splits.iter().sum();
        assert!(handed_out <= mass * 0.5 + 0.1, "at most half the mass leaves");
        for &m in &splits {
            assert!(m >= SPLIT_MIN - 1e-3, "piece {m} under minimum");
        }
    }

    #[test]
    fn test_conservation_upper_bound() {
        for &(mass, left) in &[(150.0, 3), (720.0, 15), (50_000.0, 15), (90.0, 1)] {
            let splits = distribute_cell_mass(mass, left, SPLIT_MIN, false);
            assert!(splits.len() <= left);
            let handed_out: f32 = splits.iter().sum();
            assert!(
                handed_out <= mass + 1e-2,
                "handed out {handed_out} from {mass}"
            );
        }
    }
}

// Numeric helpers for the event detector: gap filling, smoothing, peak finding

/// Mean of the first `window` non-NaN samples, or of all of them if fewer exist.
pub fn baseline(values: &[f64], window: usize) -> Option<f64> {
    let valid: Vec<f64> = values
        .iter()
        .copied()
        .filter(|v| !v.is_nan())
        .take(window.max(1))
        .collect();

    if valid.is_empty() {
        return None;
    }
    Some(valid.iter().sum::<f64>() / valid.len() as f64)
}

/// Forward fill then backward fill. `None` if every sample is NaN.
pub fn fill_gaps(values: &[f64]) -> Option<Vec<f64>> {
    let first_valid = values.iter().copied().find(|v| !v.is_nan())?;

    let mut last = first_valid;
    let filled = values
        .iter()
        .map(|v| {
            if !v.is_nan() {
                last = *v;
            }
            last
        })
        .collect();

    Some(filled)
}

/// Centered moving average of width `window`, shrinking at the edges.
///
/// For an even width the window spans `window / 2` samples before and
/// `window / 2 - 1` after the center.
pub fn centered_moving_average(values: &[f64], window: usize) -> Vec<f64> {
    let window = window.max(1);
    let before = window / 2;
    let after = window - 1 - before;
    let n = values.len();

    (0..n)
        .map(|i| {
            let lo = i.saturating_sub(before);
            let hi = (i + after).min(n.saturating_sub(1));
            let slice = &values[lo..=hi];
            slice.iter().sum::<f64>() / slice.len() as f64
        })
        .collect()
}

/// First difference; element 0 has no predecessor and is NaN.
pub fn first_difference(values: &[f64]) -> Vec<f64> {
    let mut diff = Vec::with_capacity(values.len());
    if !values.is_empty() {
        diff.push(f64::NAN);
    }
    diff.extend(values.windows(2).map(|w| w[1] - w[0]));
    diff
}

/// Mean absolute sample-to-sample change.
pub fn mean_abs_slope(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    values.windows(2).map(|w| (w[1] - w[0]).abs()).sum::<f64>() / (values.len() - 1) as f64
}

/// Index of the first maximum.
pub fn argmax(values: &[f64]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, v) in values.iter().enumerate() {
        if v.is_nan() {
            continue;
        }
        match best {
            Some((_, b)) if *v <= b => {}
            _ => best = Some((i, *v)),
        }
    }
    best.map(|(i, _)| i)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeakFilter {
    pub min_height: f64,
    pub min_prominence: f64,
    pub min_distance: usize,
}

/// Local maxima of `values` passing the height, distance and prominence filters.
///
/// Flat tops report their middle sample. A plateau that runs to the last
/// sample counts as a peak: a pressure held until logging stops is still an
/// actuation. Its prominence is measured against the left side only.
pub fn find_peaks(values: &[f64], filter: &PeakFilter) -> Vec<usize> {
    let n = values.len();
    let mut candidates = Vec::new();

    let mut i = 1;
    while i < n {
        if values[i] > values[i - 1] {
            let mut j = i;
            while j + 1 < n && values[j + 1] == values[i] {
                j += 1;
            }
            if j + 1 == n || values[j + 1] < values[i] {
                candidates.push(((i + j) / 2, j + 1 == n));
            }
            i = j + 1;
        } else {
            i += 1;
        }
    }

    candidates.retain(|(p, _)| values[*p] >= filter.min_height);

    let kept = suppress_close_peaks(values, &candidates, filter.min_distance);

    kept.into_iter()
        .filter(|(p, open_right)| prominence(values, *p, *open_right) >= filter.min_prominence)
        .map(|(p, _)| p)
        .collect()
}

/// Keep higher peaks first and drop any peak closer than `distance` to a kept one.
fn suppress_close_peaks(values: &[f64], candidates: &[(usize, bool)], distance: usize) -> Vec<(usize, bool)> {
    if distance <= 1 {
        return candidates.to_vec();
    }

    let mut order: Vec<usize> = (0..candidates.len()).collect();
    order.sort_by(|a, b| values[candidates[*b].0].total_cmp(&values[candidates[*a].0]));

    let mut keep = vec![true; candidates.len()];
    for &k in &order {
        if !keep[k] {
            continue;
        }
        let center = candidates[k].0;
        for (other, (p, _)) in candidates.iter().enumerate() {
            if other != k && keep[other] && p.abs_diff(center) < distance {
                keep[other] = false;
            }
        }
    }

    candidates
        .iter()
        .zip(keep)
        .filter_map(|(c, k)| k.then_some(*c))
        .collect()
}

fn prominence(values: &[f64], peak: usize, open_right: bool) -> f64 {
    let height = values[peak];

    let mut left_min = height;
    for v in values[..peak].iter().rev() {
        if *v > height {
            break;
        }
        left_min = left_min.min(*v);
    }

    if open_right {
        return height - left_min;
    }

    let mut right_min = height;
    for v in &values[peak + 1..] {
        if *v > height {
            break;
        }
        right_min = right_min.min(*v);
    }

    height - left_min.max(right_min)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_baseline_skips_nan() {
        let values = [f64::NAN, 2.0, 4.0, f64::NAN, 100.0];
        assert_eq!(baseline(&values, 2), Some(3.0));
        assert_eq!(baseline(&values, 1000), Some(106.0 / 3.0));
        assert_eq!(baseline(&[f64::NAN], 10), None);
    }

    #[test]
    fn test_fill_gaps() {
        let filled = fill_gaps(&[f64::NAN, 1.0, f64::NAN, 3.0, f64::NAN]).unwrap();
        assert_eq!(filled, vec![1.0, 1.0, 1.0, 3.0, 3.0]);
        assert!(fill_gaps(&[f64::NAN, f64::NAN]).is_none());
    }

    #[test]
    fn test_centered_moving_average() {
        let smoothed = centered_moving_average(&[0.0, 0.0, 3.0, 0.0, 0.0], 3);
        assert_eq!(smoothed, vec![0.0, 1.0, 1.0, 1.0, 0.0]);

        // Even width: two before, one after.
        let even = centered_moving_average(&[4.0, 0.0, 0.0, 0.0], 4);
        assert_eq!(even[0], 2.0);
        assert_eq!(even[2], 1.0);
    }

    #[test]
    fn test_first_difference_and_argmax() {
        let diff = first_difference(&[1.0, 3.0, 2.0]);
        assert!(diff[0].is_nan());
        assert_eq!(&diff[1..], &[2.0, -1.0]);
        assert_eq!(argmax(&[1.0, 5.0, 5.0, 2.0]), Some(1));
        assert_eq!(argmax(&[]), None);
    }

    #[test]
    fn test_find_peaks_filters() {
        let values = [0.0, 10.0, 0.0, 60.0, 55.0, 58.0, 0.0, 0.0];
        let filter = PeakFilter { min_height: 50.0, min_prominence: 10.0, min_distance: 1 };
        // 58 is only 3 above the saddle at 55.
        assert_eq!(find_peaks(&values, &filter), vec![3]);

        let loose = PeakFilter { min_height: 0.0, min_prominence: 0.0, min_distance: 1 };
        assert_eq!(find_peaks(&values, &loose), vec![1, 3, 5]);

        let spaced = PeakFilter { min_height: 0.0, min_prominence: 0.0, min_distance: 3 };
        assert_eq!(find_peaks(&values, &spaced), vec![3]);
    }

    #[test]
    fn test_plateau_to_end_is_a_peak() {
        let values = [0.0, 0.0, 50.0, 100.0, 100.0, 100.0];
        let filter = PeakFilter { min_height: 50.0, min_prominence: 10.0, min_distance: 1 };
        assert_eq!(find_peaks(&values, &filter), vec![4]);
    }
}

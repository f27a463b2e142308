use nalgebra::DVector;

pub struct SimpleInterpolationUtils;
impl SimpleInterpolationUtils {
    pub fn linear_interpolation(start_point: &DVector<f64>,
                                end_point: &DVector<f64>,
                                mode: &LinearInterpolationMode) -> Vec<DVector<f64>> {
        let mut out_vec = vec![];

        let mut dir = end_point - start_point;
        let n = dir.norm();
        if n == 0.0 {
            let num_knots = match mode {
                LinearInterpolationMode::FixedNumKnots { num_knots } => { (*num_knots).max(2) }
            };
            for _ in 0..num_knots { out_vec.push(start_point.clone()); }
            return out_vec;
        }
        dir /= n;

        match mode {
            LinearInterpolationMode::FixedNumKnots { num_knots } => {
                let num_knots = (*num_knots).max(2);
                let spacing_between_knots = n / (num_knots as f64 - 1.0);

                let mut curr_point = start_point.clone();
                for _ in 0..num_knots-1 {
                    out_vec.push(curr_point.clone());
                    curr_point = &curr_point + spacing_between_knots * &dir;
                }
                out_vec.push(end_point.clone());
            }
        }

        out_vec
    }
    /// First-order hold over evenly spaced knot values on `[start_time, end_time]`, evaluated
    /// every `dt` starting at `start_time`.  The final knot is always included.
    pub fn first_order_hold(values: &Vec<DVector<f64>>, start_time: f64, end_time: f64, dt: f64) -> Vec<(f64, DVector<f64>)> {
        let mut out_vec = vec![];
        if values.is_empty() { return out_vec; }
        if values.len() == 1 || end_time <= start_time || dt <= 0.0 {
            out_vec.push((start_time, values[0].clone()));
            return out_vec;
        }

        let num_intervals = values.len() - 1;
        let knot_spacing = (end_time - start_time) / num_intervals as f64;
        let times = get_range(start_time, end_time, dt);
        for t in times {
            let s = ((t - start_time) / knot_spacing).max(0.0);
            let idx = (s.floor() as usize).min(num_intervals - 1);
            let local = (s - idx as f64).min(1.0);
            let v = &values[idx] * (1.0 - local) + &values[idx + 1] * local;
            out_vec.push((t, v));
        }

        out_vec
    }
}

pub enum LinearInterpolationMode {
    FixedNumKnots { num_knots: usize }
}

pub fn get_range(range_start: f64, range_stop: f64, step_size: f64) -> Vec<f64> {
    let mut out_range = Vec::new();
    out_range.push(range_start);
    let mut last_added_val = range_start;

    while !( (range_stop - last_added_val).abs() < step_size ) {
        if range_stop > range_start {
            last_added_val = last_added_val + step_size;
        } else {
            last_added_val = last_added_val - step_size;
        }
        out_range.push(last_added_val);
    }

    if last_added_val != range_stop { out_range.push(range_stop); }

    out_range
}

//! NeuQuant Neural-Net Quantization Algorithm
//! Copyright (c) 1994 Anthony Dekker
//!
//! "Kohonen neural networks for optimal colour quantization" in "Network:
//! Computation in Neural Systems" Vol. 5 (1994) 351-367,
//! DOI:10.1088/0954-898X/5/3/003
//!
//! JavaScript port 2012 by Johan Nordberg.
//! TypeScript port 2021 by Antonio Román.
//! Rust port by the gifloom project, reworked onto a struct-of-arrays
//! `Vec<[i32; 4]>` network and integer fixed-point arithmetic throughout
//! (the original port this crate grew out of used `f64` neurons, which
//! drifts from the published algorithm's exact-integer semantics).

const NET_BIAS_SHIFT: i32 = 4;
const INT_BIAS_SHIFT: i32 = 16;
const INT_BIAS: i32 = 1 << INT_BIAS_SHIFT;
const GAMMA_SHIFT: i32 = 10;
const BETA_SHIFT: i32 = 10;
const BETA: i32 = INT_BIAS >> BETA_SHIFT;
const BETA_GAMMA: i32 = INT_BIAS << (GAMMA_SHIFT - BETA_SHIFT);

const RADIUS_BIAS_SHIFT: i32 = 6;
const RADIUS_BIAS: i32 = 1 << RADIUS_BIAS_SHIFT;
const RADIUS_DEC: i32 = 30;

const ALPHA_BIAS_SHIFT: i32 = 10;
const INIT_ALPHA: i32 = 1 << ALPHA_BIAS_SHIFT;

const RAD_BIAS_SHIFT: i32 = 8;
const RAD_BIAS: i32 = 1 << RAD_BIAS_SHIFT;
const ALPHA_RAD_BIAS_SHIFT: i32 = ALPHA_BIAS_SHIFT + RAD_BIAS_SHIFT;
const ALPHA_RAD_BIAS: i32 = 1 << ALPHA_RAD_BIAS_SHIFT;

const NCYCLES: i32 = 100;

/// Four primes near 500; no real image's byte length is divisible by all
/// four, which is exploited to pick a pseudo-random sampling stride.
const PRIMES: [usize; 4] = [499, 491, 487, 503];
const MIN_PICTURE_BYTES: usize = 3 * PRIMES[3];

/// A Kohonen self-organizing map of up to 256 BGR "neurons", trained on a
/// flat BGR byte buffer and queried with [`NeuQuant::map`] for the nearest
/// learned color.
pub struct NeuQuant {
    /// `network[i] = [b, g, r, original_index]`, biased left by
    /// `NET_BIAS_SHIFT` bits until [`unbias`](Self::unbias) runs.
    network: Vec<[i32; 4]>,
    netindex: [i32; 256],
    bias: Vec<i32>,
    freq: Vec<i32>,
    radpower: Vec<i32>,
    colors: usize,
}

impl NeuQuant {
    /// Learns a palette of up to `colors` (`<= 256`) neurons from `pixels`
    /// (flat BGR bytes) and returns it ready for [`map`](Self::map)
    /// queries. `sample_fac` is the quality knob from `spec.md` §3 (`1` is
    /// best/slowest, up to `30`).
    pub fn process(pixels: &[u8], colors: usize, sample_fac: u8) -> Self {
        let colors = colors.clamp(1, 256);
        let mut nq = NeuQuant {
            network: Vec::with_capacity(colors),
            netindex: [0; 256],
            bias: vec![0; colors],
            freq: vec![INT_BIAS / colors as i32; colors],
            radpower: Vec::new(),
            colors,
        };
        nq.init();
        nq.learn(pixels, sample_fac);
        nq.unbias();
        nq.build_index();
        nq
    }

    fn init(&mut self) {
        let n = self.colors as i32;
        self.network = (0..self.colors)
            .map(|i| {
                let v = ((i as i32) << (NET_BIAS_SHIFT + 8)) / n;
                [v, v, v, 0]
            })
            .collect();
    }

    fn learn(&mut self, pixels: &[u8], sample_fac: u8) {
        let n = self.colors;
        let initrad = (n >> 3).max(1);
        let initradius = (initrad as i32) * RADIUS_BIAS;

        let mut sample_fac = sample_fac.max(1) as usize;
        if pixels.len() < MIN_PICTURE_BYTES {
            sample_fac = 1;
        }

        let sample_pixels = pixels.len() / (3 * sample_fac);
        let alphadec = 30 + (sample_fac.saturating_sub(1)) / 3;
        let delta = (sample_pixels / NCYCLES as usize).max(1);

        let mut alpha = INIT_ALPHA;
        let mut radius = initradius;
        let mut rad = radius >> RADIUS_BIAS_SHIFT;
        if rad <= 1 {
            rad = 0;
        }

        self.radpower = vec![0; initrad.max(1)];
        self.recalc_radpower(rad, alpha);

        let step = if pixels.len() < MIN_PICTURE_BYTES {
            3
        } else {
            PRIMES
                .iter()
                .find(|&&p| pixels.len() % p != 0)
                .copied()
                .unwrap_or(PRIMES[3])
                * 3
        };

        let mut pixel_pos = 0usize;
        let mut i = 0usize;
        while i < sample_pixels {
            let b = ((pixels[pixel_pos] as i32) & 0xFF) << NET_BIAS_SHIFT;
            let g = ((pixels[pixel_pos + 1] as i32) & 0xFF) << NET_BIAS_SHIFT;
            let r = ((pixels[pixel_pos + 2] as i32) & 0xFF) << NET_BIAS_SHIFT;

            let j = self.contest(b, g, r);
            self.alter_single(alpha, j, b, g, r);
            if rad != 0 {
                self.alter_neighbor(rad, j, b, g, r);
            }

            pixel_pos = (pixel_pos + step) % pixels.len();
            i += 1;

            if i % delta == 0 {
                alpha -= alpha / alphadec as i32;
                radius -= radius / RADIUS_DEC;
                rad = radius >> RADIUS_BIAS_SHIFT;
                if rad <= 1 {
                    rad = 0;
                }
                self.recalc_radpower(rad, alpha);
            }
        }
    }

    fn recalc_radpower(&mut self, rad: i32, alpha: i32) {
        if rad <= 0 {
            return;
        }
        let rad = rad as usize;
        if self.radpower.len() < rad {
            self.radpower.resize(rad, 0);
        }
        for i in 0..rad {
            let rad_sq = (rad * rad) as i32;
            let i_sq = (i * i) as i32;
            self.radpower[i] = alpha * ((rad_sq - i_sq) * RAD_BIAS / rad_sq);
        }
    }

    /// Picks the winning neuron for `(b, g, r)`, updating every neuron's
    /// frequency/bias accounting along the way. Returns the bias-adjusted
    /// winner used for learning (not necessarily the plain nearest).
    fn contest(&mut self, b: i32, g: i32, r: i32) -> usize {
        let mut best_dist = i32::MAX;
        let mut best_bias_dist = i32::MAX;
        let mut best_pos = 0;
        let mut best_bias_pos = 0;

        for i in 0..self.colors {
            let n = self.network[i];
            let dist = (n[0] - b).abs() + (n[1] - g).abs() + (n[2] - r).abs();
            if dist < best_dist {
                best_dist = dist;
                best_pos = i;
            }

            let bias_dist = dist - (self.bias[i] >> (INT_BIAS_SHIFT - NET_BIAS_SHIFT));
            if bias_dist < best_bias_dist {
                best_bias_dist = bias_dist;
                best_bias_pos = i;
            }

            let betafreq = self.freq[i] >> BETA_SHIFT;
            self.freq[i] -= betafreq;
            self.bias[i] += betafreq << GAMMA_SHIFT;
        }

        self.freq[best_pos] += BETA;
        self.bias[best_pos] -= BETA_GAMMA;

        best_bias_pos
    }

    fn alter_single(&mut self, alpha: i32, i: usize, b: i32, g: i32, r: i32) {
        let n = &mut self.network[i];
        n[0] -= alpha * (n[0] - b) / INIT_ALPHA;
        n[1] -= alpha * (n[1] - g) / INIT_ALPHA;
        n[2] -= alpha * (n[2] - r) / INIT_ALPHA;
    }

    fn alter_neighbor(&mut self, rad: i32, i: usize, b: i32, g: i32, r: i32) {
        let n = self.colors as i32;
        let lo = (i as i32 - rad).max(-1);
        let hi = (i as i32 + rad).min(n);

        let mut j = i as i32 + 1;
        let mut k = i as i32 - 1;
        let mut m = 1usize;

        while j < hi || k > lo {
            let a = self.radpower.get(m).copied().unwrap_or(0);

            if j < hi {
                self.alter_neighbor_single(a, j as usize, b, g, r);
                j += 1;
            }
            if k > lo {
                self.alter_neighbor_single(a, k as usize, b, g, r);
                k -= 1;
            }
            m += 1;
        }
    }

    fn alter_neighbor_single(&mut self, alpha: i32, i: usize, b: i32, g: i32, r: i32) {
        if i >= self.colors {
            return;
        }
        let n = &mut self.network[i];
        n[0] -= alpha * (n[0] - b) / ALPHA_RAD_BIAS;
        n[1] -= alpha * (n[1] - g) / ALPHA_RAD_BIAS;
        n[2] -= alpha * (n[2] - r) / ALPHA_RAD_BIAS;
    }

    fn unbias(&mut self) {
        for (i, n) in self.network.iter_mut().enumerate() {
            n[0] >>= NET_BIAS_SHIFT;
            n[1] >>= NET_BIAS_SHIFT;
            n[2] >>= NET_BIAS_SHIFT;
            n[3] = i as i32;
        }
    }

    /// Selection-sorts the network by green ascending and builds
    /// `netindex[g]` = the first neuron to consider when querying green
    /// value `g`.
    fn build_index(&mut self) {
        let n = self.colors;
        let mut prev_color = 0i32;
        let mut start_pos = 0i32;

        for i in 0..n {
            let (min_pos, min_val) = self.network[i..]
                .iter()
                .enumerate()
                .min_by_key(|(_, net)| net[1])
                .map(|(off, net)| (i + off, net[1]))
                .unwrap();

            if i != min_pos {
                self.network.swap(i, min_pos);
            }

            if min_val != prev_color {
                let prev = prev_color as usize;
                self.netindex[prev] = (start_pos + i as i32) >> 1;
                for g in (prev_color + 1)..min_val {
                    self.netindex[g as usize] = i as i32;
                }
            }

            prev_color = min_val;
            start_pos = i as i32;
        }

        let last = prev_color as usize;
        self.netindex[last] = (start_pos + (n as i32 - 1)) >> 1;
        for g in (prev_color + 1)..256 {
            self.netindex[g as usize] = n as i32 - 1;
        }
    }

    /// Nearest-neighbor query, walking outward from `netindex[g]` in both
    /// directions and pruning on the green channel alone (the network is
    /// sorted by green, so once `|net.g - g| >= best` in a direction no
    /// closer match remains that way).
    pub fn map(&self, b: u8, g: u8, r: u8) -> i32 {
        let (b, g, r) = (b as i32, g as i32, r as i32);
        let mut best_dist = i32::MAX;
        let mut best = -1i32;

        let start = self.netindex[g.clamp(0, 255) as usize] as usize;

        for net in &self.network[start..] {
            let dist_g = (net[1] - g).abs();
            if dist_g >= best_dist {
                break;
            }
            let mut dist = dist_g + (net[0] - b).abs();
            if dist >= best_dist {
                continue;
            }
            dist += (net[2] - r).abs();
            if dist >= best_dist {
                continue;
            }
            best_dist = dist;
            best = net[3];
        }

        if start > 0 {
            for net in self.network[..start].iter().rev() {
                let dist_g = (net[1] - g).abs();
                if dist_g >= best_dist {
                    break;
                }
                let mut dist = dist_g + (net[0] - b).abs();
                if dist >= best_dist {
                    continue;
                }
                dist += (net[2] - r).abs();
                if dist >= best_dist {
                    continue;
                }
                best_dist = dist;
                best = net[3];
            }
        }

        best
    }

    /// Looks up the `(r, g, b)` color of the neuron whose *original*
    /// (pre-sort) index is `original_index`. Used by the palette builder,
    /// which only ever knows colors by their `map()`-returned original
    /// index. A linear scan over `<= 256` neurons, matching `spec.md`
    /// §4.6's "scan net for the entry whose net[k][3] == quantizer_index".
    pub fn color_for_index(&self, original_index: i32) -> (u8, u8, u8) {
        let n = self
            .network
            .iter()
            .find(|n| n[3] == original_index)
            .expect("quantizer index must name a neuron in this network");
        (n[2] as u8, n[1] as u8, n[0] as u8)
    }

    pub fn colors(&self) -> usize {
        self.colors
    }
}

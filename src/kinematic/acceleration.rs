/// The free-driving acceleration model of a vehicle that is not under
/// external speed control.
#[derive(Clone, Debug)]
pub struct AccelerationModel {
    /// The desired time gap to the vehicle ahead in s.
    headway: f64,
    /// The standstill gap in m.
    min_gap: f64,
    max_acc: f64,
    comf_dec: f64,
    /// Scales the road speed limit into the vehicle's desired speed.
    speed_factor: f64,
}

/// The parameters of the acceleration model.
pub struct ModelParams {
    /// The desired gap between this and the vehicle ahead in seconds.
    pub time_headway: f64,
    /// The minimum gap to the vehicle ahead in m.
    pub min_gap: f64,
    /// The vehicle's maximum acceleration in m/s<sup>2</sup>.
    pub max_acceleration: f64,
    /// The comfortable decelleration in m/s<sup>2</sup>.
    pub comf_deceleration: f64,
}

impl AccelerationModel {
    /// Creates a new acceleration model.
    pub fn new(params: &ModelParams) -> Self {
        AccelerationModel {
            headway: params.time_headway,
            min_gap: params.min_gap,
            max_acc: params.max_acceleration,
            comf_dec: params.comf_deceleration,
            speed_factor: 1.0,
        }
    }

    pub fn set_speed_factor(&mut self, factor: f64) {
        self.speed_factor = factor;
    }

    pub fn speed_factor(&self) -> f64 {
        self.speed_factor
    }

    pub fn set_headway(&mut self, headway: f64) {
        self.headway = headway;
    }

    pub fn set_min_gap(&mut self, min_gap: f64) {
        self.min_gap = min_gap;
    }

    pub fn min_gap(&self) -> f64 {
        self.min_gap
    }

    pub fn max_acc(&self) -> f64 {
        self.max_acc
    }

    /// Calculates the acceleration needed to maintain the speed limit.
    /// # Arguments
    /// * `vel` - The velocity of the simulated vehicle (m/s).
    /// * `speed_limit` - The current speed limit (m/s).
    pub fn free_road(&self, vel: f64, speed_limit: f64) -> f64 {
        let speed_limit = self.speed_factor * speed_limit;
        if speed_limit <= 0.0 {
            return -2.0 * self.comf_dec;
        }
        self.max_acc * (1. - (vel / speed_limit).powi(4))
    }

    /// Calculates the acceleration needed to follow the vehicle ahead.
    ///
    /// # Arguments
    /// * `net_dist` - The distance between this vehicle and the vehicle ahead in metres.
    /// * `my_vel` - The velocity of the simulated vehicle (m/s).
    /// * `their_vel` - The vehicle ahead's velocity (m/s).
    pub fn follow_vehicle(&self, net_dist: f64, my_vel: f64, their_vel: f64) -> f64 {
        let comf_dec = self.comf_dec;
        let max_acc = self.max_acc;

        if net_dist <= self.min_gap {
            -10. * max_acc
        } else {
            let appr = my_vel - their_vel;
            let factor = 1. / (2. * (max_acc * comf_dec).sqrt());
            let ss = self.min_gap + (my_vel * self.headway) + (my_vel * appr * factor);
            let term = ss / net_dist;
            max_acc * (1. - (term * term))
        }
    }
}

//! Hardware Resource Allocation
//!
//! Pin and peripheral assignment for the robot, grouped by what uses them.
//!
//! # Resource Groups
//! - Encoders: A/B inputs of both wheel encoders
//! - Potentiometers: ADC and the two operator pots
//! - Motors: H-bridge standby line, PWM slices and direction lines
//! - Display: SSD1306 on I2C0
//! - Operator: stop button

use assign_resources::assign_resources;
use embassy_rp::peripherals;

assign_resources! {
    /// Quadrature encoder channels
    encoders: EncoderResources {
        left_a: PIN_6,
        left_b: PIN_7,
        right_a: PIN_8,
        right_b: PIN_9,
    },
    /// Operator potentiometers, one per wheel
    pots: PotResources {
        adc: ADC,
        left_pin: PIN_26,
        right_pin: PIN_27,
    },
    /// Dual H-bridge driver
    motors: MotorResources {
        standby_pin: PIN_22,
        // GPIO2 is PWM slice 1 channel A
        left_slice: PWM_SLICE1,
        left_pwm_pin: PIN_2,
        left_in1_pin: PIN_21,
        left_in2_pin: PIN_20,
        // GPIO4 is PWM slice 2 channel A
        right_slice: PWM_SLICE2,
        right_pwm_pin: PIN_4,
        right_in1_pin: PIN_19,
        right_in2_pin: PIN_18,
    },
    /// SSD1306 128x32 OLED
    display: DisplayResources {
        i2c: I2C0,
        sda: PIN_12,
        scl: PIN_13,
    },
    /// Stop button, active low
    operator: OperatorResources {
        stop_button: PIN_16,
    },
}

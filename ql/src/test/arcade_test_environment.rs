use anyhow::Result;
use image::Rgb;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::env::frame::{Frame, FrameShape, PixelKind, RgbFrame};
use crate::prelude::{ActionMeaning, ArcadeEnvironment, ModelActionType, QlError, Step, StepInfo};

pub const CATCH_ID: &str = "catch";

const HEIGHT: usize = 210;
const WIDTH: usize = 160;
const PADDLE_ROW: usize = 190;
const PADDLE_HEIGHT: usize = 4;
const PADDLE_HALF_WIDTH: i32 = 10;
const PADDLE_SPEED: i32 = 6;
const BALL_SIZE: usize = 4;
const BALL_SPEED: i32 = 5;
const LIVES: u32 = 3;
/// game is won after that many catches
const MAX_CATCHES: u32 = 20;

const PADDLE_COLOR: Rgb<u8> = Rgb([200, 72, 72]);
const BALL_COLOR: Rgb<u8> = Rgb([236, 236, 236]);
const BORDER_COLOR: Rgb<u8> = Rgb([142, 142, 142]);

const ACTION_MEANINGS: [ActionMeaning; 4] = [ActionMeaning::Noop, ActionMeaning::Fire, ActionMeaning::Right, ActionMeaning::Left];

/// A small arcade game for testing the frame pipeline and the learner.
///
/// 210x160 RGB screen. A ball falls from the top, the paddle at the bottom has to catch it.
/// - Actions: NOOP, FIRE, RIGHT, LEFT
/// - The ball has to be launched with FIRE at the start of the game and after every lost life
/// - +1 reward per caught ball; a missed ball costs one of 3 lives; game over at 0 lives or after 20 catches
/// - The ball is drawn on every second frame only (flicker)
#[derive(Clone)]
pub struct CatchTestEnvironment {
    rng: StdRng,
    paddle_x: i32,
    ball: Option<(i32, i32)>,
    lives: u32,
    catches: u32,
    frame_count: u64,
}

impl CatchTestEnvironment {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            paddle_x: WIDTH as i32 / 2,
            ball: None,
            lives: LIVES,
            catches: 0,
            frame_count: 0,
        }
    }

    fn launch_ball(&mut self) {
        let x = self.rng.gen_range(BALL_SIZE as i32..(WIDTH - BALL_SIZE) as i32);
        self.ball = Some((x, 0));
    }

    fn render(&self) -> Frame {
        let mut screen = RgbFrame::new(WIDTH as u32, HEIGHT as u32);
        let mut fill = |y0: usize, y1: usize, x0: usize, x1: usize, color: Rgb<u8>| {
            for y in y0..y1.min(HEIGHT) {
                for x in x0..x1.min(WIDTH) {
                    screen.put_pixel(x as u32, y as u32, color);
                }
            }
        };
        fill(0, 2, 0, WIDTH, BORDER_COLOR);
        let paddle_x0 = (self.paddle_x - PADDLE_HALF_WIDTH).max(0) as usize;
        let paddle_x1 = (self.paddle_x + PADDLE_HALF_WIDTH) as usize;
        fill(PADDLE_ROW, PADDLE_ROW + PADDLE_HEIGHT, paddle_x0, paddle_x1, PADDLE_COLOR);
        if let Some((x, y)) = self.ball {
            if self.frame_count % 2 == 0 {
                let (x, y) = (x.max(0) as usize, y.max(0) as usize);
                fill(y, y + BALL_SIZE, x, x + BALL_SIZE, BALL_COLOR);
            }
        }
        Frame::Rgb(screen)
    }

    pub fn catches(&self) -> u32 { self.catches }
}

impl ArcadeEnvironment for CatchTestEnvironment {
    fn reset(&mut self) -> Result<Frame> {
        self.paddle_x = WIDTH as i32 / 2;
        self.ball = None;
        self.lives = LIVES;
        self.catches = 0;
        self.frame_count = 0;
        Ok(self.render())
    }

    fn step(
        &mut self,
        action: ModelActionType,
    ) -> Result<Step<Frame>> {
        let meaning = match ACTION_MEANINGS.get(action as usize) {
            Some(&m) => m,
            None => Err(QlError(format!("invalid action {}", action)))?,
        };
        if self.lives == 0 || self.catches >= MAX_CATCHES {
            Err(QlError::from("step called after game over"))?
        }
        self.frame_count += 1;

        match meaning {
            ActionMeaning::Fire if self.ball.is_none() => self.launch_ball(),
            ActionMeaning::Right => self.paddle_x = (self.paddle_x + PADDLE_SPEED).min(WIDTH as i32 - PADDLE_HALF_WIDTH),
            ActionMeaning::Left => self.paddle_x = (self.paddle_x - PADDLE_SPEED).max(PADDLE_HALF_WIDTH),
            _ => {}
        }

        let mut reward = 0.0;
        if let Some((x, y)) = self.ball {
            let y = y + BALL_SPEED;
            if y + BALL_SIZE as i32 >= PADDLE_ROW as i32 {
                let ball_center = x + BALL_SIZE as i32 / 2;
                if (ball_center - self.paddle_x).abs() <= PADDLE_HALF_WIDTH {
                    reward = 1.0;
                    self.catches += 1;
                    self.launch_ball();
                } else {
                    self.lives -= 1;
                    self.ball = None;
                }
            } else {
                self.ball = Some((x, y));
            }
        }

        let done = self.lives == 0 || self.catches >= MAX_CATCHES;
        Ok(Step {
            observation: self.render(),
            reward,
            done,
            info: StepInfo {
                truncated: false,
                lives: self.lives,
            },
        })
    }

    fn action_meanings(&self) -> &[ActionMeaning] { &ACTION_MEANINGS }

    fn lives(&self) -> u32 { self.lives }

    fn frame_shape(&self) -> FrameShape { FrameShape::new(HEIGHT, WIDTH, 3, PixelKind::U8) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ball_waits_for_fire() -> Result<()> {
        let mut env = CatchTestEnvironment::new(1);
        env.reset()?;
        for _ in 0..100 {
            let step = env.step(0)?;
            assert_eq!(step.reward, 0.0);
            assert!(!step.done);
        }
        assert_eq!(env.lives(), LIVES);
        Ok(())
    }

    #[test]
    fn test_missed_balls_end_the_game() -> Result<()> {
        let mut env = CatchTestEnvironment::new(2);
        env.reset()?;
        let mut steps = 0;
        loop {
            // keep firing, never move
            let step = env.step(1)?;
            steps += 1;
            if step.done {
                break;
            }
            assert!(steps < 10_000);
        }
        assert!(env.lives() == 0 || env.catches() == MAX_CATCHES);
        assert!(env.step(0).is_err());
        Ok(())
    }

    #[test]
    fn test_ball_flickers() -> Result<()> {
        let mut env = CatchTestEnvironment::new(3);
        env.reset()?;
        let a = env.step(1)?.observation;
        let b = env.step(0)?.observation;
        let lit = |f: &Frame| match f {
            Frame::Rgb(screen) => screen.pixels().filter(|&&p| p == BALL_COLOR).count(),
            _ => 0,
        };
        assert_eq!(lit(&a) + lit(&b), BALL_SIZE * BALL_SIZE);
        Ok(())
    }
}

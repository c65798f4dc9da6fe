// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Talking-head animation driven by the bot's speaking state.
//!
//! [`TalkingAnimation`] watches `BotStartedSpeakingFrame` and
//! `BotStoppedSpeakingFrame` and switches the video track between a looping
//! sprite (while the bot talks) and a single quiet image (while it listens).
//! It never originates speaking signals; it only reacts to them.

use std::path::Path;

use async_trait::async_trait;

use crate::error::PipelineError;
use crate::frames::frame_enum::FrameEnum;
use crate::frames::{ImageRawData, OutputImageRawFrame, SpriteFrame};
use crate::impl_processor_display;
use crate::processors::processor::{Processor, ProcessorContext, ProcessorWeight};
use crate::processors::FrameDirection;
use crate::utils::base_object::obj_id;

/// What the animator last put on the video track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnimationState {
    /// The quiet image.
    Idle,
    /// The talking loop.
    Talking,
}

/// Images used by the avatar.
#[derive(Debug, Clone)]
pub struct AvatarAssets {
    /// Shown while the bot is listening.
    pub quiet: ImageRawData,
    /// Played in a loop while the bot is speaking.
    pub talking: Vec<ImageRawData>,
}

impl AvatarAssets {
    /// Build assets from an ordered run of animation frames.
    ///
    /// The talking loop plays the frames forward and then backward so it
    /// wraps around smoothly; the first frame doubles as the quiet image.
    pub fn from_frames(frames: Vec<ImageRawData>) -> Result<Self, PipelineError> {
        let Some(quiet) = frames.first().cloned() else {
            return Err(PipelineError::Configuration(
                "avatar needs at least one image".into(),
            ));
        };
        let mut talking = frames.clone();
        talking.extend(frames.into_iter().rev());
        Ok(Self { quiet, talking })
    }

    /// Load `robot01.png` .. `robotNN.png` from `dir` as RGB images.
    pub fn load_dir(dir: &Path, count: usize) -> Result<Self, PipelineError> {
        let mut frames = Vec::with_capacity(count);
        for i in 1..=count {
            let path = dir.join(format!("robot{i:02}.png"));
            let image = image::open(&path)
                .map_err(|e| {
                    PipelineError::Configuration(format!("failed to load {}: {e}", path.display()))
                })?
                .to_rgb8();
            let size = image.dimensions();
            frames.push(ImageRawData::new(image.into_raw(), size, Some("RGB".into())));
        }
        tracing::debug!(dir = %dir.display(), count, "loaded avatar sprites");
        Self::from_frames(frames)
    }

    /// Solid-colour frames of the given size, for running without art assets.
    ///
    /// Each frame is a slightly different shade so the loop is visible.
    pub fn placeholder(width: u32, height: u32, frame_count: usize) -> Result<Self, PipelineError> {
        let pixels = (width as usize) * (height as usize);
        let frames = (0..frame_count)
            .map(|i| {
                let shade = (64 + (i * 8) % 192) as u8;
                let rgb: Vec<u8> = std::iter::repeat([shade, shade, 255u8])
                    .take(pixels)
                    .flatten()
                    .collect();
                ImageRawData::new(rgb, (width, height), Some("RGB".into()))
            })
            .collect();
        Self::from_frames(frames)
    }

    /// The frame that shows the quiet image.
    pub fn quiet_frame(&self) -> OutputImageRawFrame {
        OutputImageRawFrame::new(self.quiet.clone())
    }

    /// The frame that starts the talking loop.
    pub fn talking_frame(&self) -> SpriteFrame {
        SpriteFrame::new(self.talking.clone())
    }
}

/// Switches the avatar between its talking loop and its quiet image.
///
/// Each maximal run of `BotStartedSpeakingFrame`s produces one `SpriteFrame`
/// and each maximal run of `BotStoppedSpeakingFrame`s one
/// `OutputImageRawFrame`, including a run that arrives before anything was
/// shown. Speaking frames are always forwarded.
pub struct TalkingAnimation {
    id: u64,
    name: String,
    assets: AvatarAssets,
    last_emitted: Option<AnimationState>,
}

impl TalkingAnimation {
    pub fn new(assets: AvatarAssets) -> Self {
        Self {
            id: obj_id(),
            name: "TalkingAnimation".to_string(),
            assets,
            last_emitted: None,
        }
    }

    /// Current state; `Idle` until the talking loop has been shown.
    pub fn state(&self) -> AnimationState {
        self.last_emitted.unwrap_or(AnimationState::Idle)
    }

    /// The quiet image, for showing before the conversation starts.
    pub fn quiet_frame(&self) -> OutputImageRawFrame {
        self.assets.quiet_frame()
    }

    fn transition(&mut self, to: AnimationState, ctx: &ProcessorContext) {
        if self.last_emitted == Some(to) {
            return;
        }
        tracing::trace!(processor = %self.name, state = ?to, "avatar transition");
        let frame = match to {
            AnimationState::Talking => FrameEnum::Sprite(self.assets.talking_frame()),
            AnimationState::Idle => FrameEnum::OutputImageRaw(self.assets.quiet_frame()),
        };
        ctx.send_downstream(frame);
        self.last_emitted = Some(to);
    }
}

impl_processor_display!(TalkingAnimation);

#[async_trait]
impl Processor for TalkingAnimation {
    fn name(&self) -> &str {
        &self.name
    }

    fn id(&self) -> u64 {
        self.id
    }

    fn weight(&self) -> ProcessorWeight {
        ProcessorWeight::Light
    }

    async fn process(&mut self, frame: FrameEnum, direction: FrameDirection, ctx: &ProcessorContext) {
        match &frame {
            FrameEnum::BotStartedSpeaking(_) => self.transition(AnimationState::Talking, ctx),
            FrameEnum::BotStoppedSpeaking(_) => self.transition(AnimationState::Idle, ctx),
            _ => {}
        }
        ctx.send(frame, direction);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::{BotStartedSpeakingFrame, BotStoppedSpeakingFrame};
    use tokio::sync::mpsc;

    fn image(tag: u8) -> ImageRawData {
        ImageRawData::new(vec![tag; 3], (1, 1), Some("RGB".into()))
    }

    fn started() -> FrameEnum {
        FrameEnum::BotStartedSpeaking(BotStartedSpeakingFrame::new())
    }

    fn stopped() -> FrameEnum {
        FrameEnum::BotStoppedSpeaking(BotStoppedSpeakingFrame::new())
    }

    async fn run(signals: Vec<FrameEnum>) -> Vec<&'static str> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (utx, _urx) = mpsc::unbounded_channel();
        let ctx = ProcessorContext::for_test(tx, utx);
        let assets = AvatarAssets::from_frames(vec![image(1), image(2)]).unwrap();
        let mut animation = TalkingAnimation::new(assets);
        for signal in signals {
            animation
                .process(signal, FrameDirection::Downstream, &ctx)
                .await;
        }
        std::iter::from_fn(|| rx.try_recv().ok())
            .map(|f| f.name())
            .filter(|name| *name == "SpriteFrame" || *name == "OutputImageRawFrame")
            .collect()
    }

    #[test]
    fn talking_loop_plays_forward_then_back() {
        let assets = AvatarAssets::from_frames(vec![image(1), image(2), image(3)]).unwrap();
        let tags: Vec<u8> = assets.talking.iter().map(|i| i.image[0]).collect();
        assert_eq!(tags, vec![1, 2, 3, 3, 2, 1]);
        assert_eq!(assets.quiet.image[0], 1);
    }

    #[test]
    fn no_frames_is_a_configuration_error() {
        let err = AvatarAssets::from_frames(Vec::new()).unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }

    #[test]
    fn placeholder_has_requested_size() {
        let assets = AvatarAssets::placeholder(4, 2, 3).unwrap();
        assert_eq!(assets.quiet.size, (4, 2));
        assert_eq!(assets.quiet.image.len(), 4 * 2 * 3);
        assert_eq!(assets.talking.len(), 6);
    }

    #[tokio::test]
    async fn duplicate_start_does_not_restart_loop() {
        let emitted = run(vec![started(), started(), stopped()]).await;
        assert_eq!(emitted, vec!["SpriteFrame", "OutputImageRawFrame"]);
    }

    #[tokio::test]
    async fn leading_stops_show_quiet_image_once() {
        let emitted = run(vec![stopped(), stopped(), started(), stopped(), stopped()]).await;
        assert_eq!(
            emitted,
            vec!["OutputImageRawFrame", "SpriteFrame", "OutputImageRawFrame"]
        );
    }

    #[tokio::test]
    async fn speaking_signals_are_forwarded() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (utx, mut urx) = mpsc::unbounded_channel();
        let ctx = ProcessorContext::for_test(tx, utx);
        let mut animation =
            TalkingAnimation::new(AvatarAssets::from_frames(vec![image(9)]).unwrap());

        animation.process(started(), FrameDirection::Downstream, &ctx).await;
        animation.process(stopped(), FrameDirection::Upstream, &ctx).await;

        let down: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).map(|f| f.name()).collect();
        assert_eq!(down, vec!["SpriteFrame", "BotStartedSpeakingFrame", "OutputImageRawFrame"]);
        assert!(matches!(urx.try_recv(), Ok(FrameEnum::BotStoppedSpeaking(_))));
        assert_eq!(animation.state(), AnimationState::Idle);
    }

    #[tokio::test]
    async fn other_frames_pass_through() {
        let emitted = run(vec![FrameEnum::text("hi")]).await;
        assert!(emitted.is_empty());
    }
}

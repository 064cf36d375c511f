use anyhow::{Context, Result};
use env_logger::Env;
use hearing_screen::audio_output::{AudioContext, DEFAULT_SAMPLE_RATE};
use hearing_screen::config::Config;
use hearing_screen::report::{self, CustomerData};
use hearing_screen::scoring;
use hearing_screen::screening::{self, ConsoleResponder, SweepParams};
use hearing_screen::tone_generator::ToneGenerator;
use hearing_screen::types::{Ear, EarResultSet, HearingTestResult};
use serde::Deserialize;
use std::str::FromStr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

const DEFAULT_CONFIG_PATH: &str = "config.toml";

const USAGE: &str = "\
使い方:
  hearing-screen [config.toml]
  hearing-screen run [config.toml] [--customer customer.json]
  hearing-screen tone <Hz> <音量 0-1> <left|right|both> [ms]
  hearing-screen render <out.wav> <Hz> <音量 0-1> <left|right|both> <ms>
  hearing-screen score <input.json>
  hearing-screen --show-interfaces
  hearing-screen --generate-config [path]";

/// `score` コマンドの入力
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScoreInput {
    answers: Vec<usize>,
    left_ear_results: EarResultSet,
    right_ear_results: EarResultSet,
    #[serde(default)]
    customer_data: Option<CustomerData>,
}

fn init_logger(level: &str) {
    env_logger::Builder::from_env(Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

/// 設定を読み込んでからロガーを初期化
fn load_config(path: &str) -> Result<Config> {
    let loaded = Config::load(path)?;
    let found = loaded.is_some();
    let config = loaded.unwrap_or_default();
    init_logger(&config.output.log_level);
    if !found {
        log::warn!("設定ファイルが見つかりません。デフォルト設定を使用します: {}", path);
    }
    log::debug!("設定: {:?}", config);
    Ok(config)
}

fn parse_arg<T>(args: &[String], index: usize, name: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw = args
        .get(index)
        .with_context(|| format!("{} を指定してください\n{}", name, USAGE))?;
    raw.parse::<T>()
        .with_context(|| format!("{} の指定が不正です: {}", name, raw))
}

/// Ctrl+C で下ろされる実行フラグ
fn install_interrupt_handler() -> Result<Arc<AtomicBool>> {
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = running.clone();
    ctrlc::set_handler(move || {
        log::info!("停止シグナルを受信しました...");
        running_clone.store(false, Ordering::SeqCst);
    })?;
    Ok(running)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // コマンドライン引数をパース
    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(String::as_str);

    match command {
        Some("--help") | Some("-h") => {
            println!("{}", USAGE);
            Ok(())
        }
        // デバイス一覧表示モード
        Some("--show-interfaces") => {
            init_logger("info");
            AudioContext::list_devices()
        }
        // 設定ファイル生成モード
        Some("--generate-config") => {
            let config_path = args.get(2).map(String::as_str).unwrap_or(DEFAULT_CONFIG_PATH);
            Config::write_default(config_path)?;
            println!("設定ファイルを生成しました: {}", config_path);
            Ok(())
        }
        Some("tone") => play_single_tone(&args).await,
        Some("render") => render_wav(&args),
        Some("score") => score_file(&args).await,
        Some("run") => {
            let (config_path, customer_path) = parse_run_args(&args[2..])?;
            run_interactive(config_path, customer_path).await
        }
        Some(flag) if flag.starts_with("--") => {
            anyhow::bail!("不明なオプション: {}\n{}", flag, USAGE)
        }
        Some(config_path) => run_interactive(config_path, None).await,
        None => run_interactive(DEFAULT_CONFIG_PATH, None).await,
    }
}

/// `run` の引数: [config.toml] [--customer file.json]
fn parse_run_args(args: &[String]) -> Result<(&str, Option<&str>)> {
    let mut config_path = DEFAULT_CONFIG_PATH;
    let mut customer_path = None;
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--customer" => {
                let path = iter.next().context("--customer にファイルを指定してください")?;
                customer_path = Some(path.as_str());
            }
            flag if flag.starts_with("--") => anyhow::bail!("不明なオプション: {}", flag),
            path => config_path = path,
        }
    }
    Ok((config_path, customer_path))
}

fn read_customer(path: &str) -> Result<CustomerData> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("顧客情報ファイルの読み込みに失敗: {}", path))?;
    serde_json::from_str(&content).with_context(|| format!("顧客情報のパースに失敗: {}", path))
}

/// 対話形式の検査
async fn run_interactive(config_path: &str, customer_path: Option<&str>) -> Result<()> {
    let config = load_config(config_path)?;
    let customer = customer_path.map(read_customer).transpose()?;

    log::info!("hearing-screen を起動します");
    let running = install_interrupt_handler()?;

    let mut generator = ToneGenerator::new(&config.audio);
    if !generator.is_available() {
        println!("音声出力を利用できません。トーンは再生されません。");
    }

    println!("アンケートに番号で回答してください。");
    println!("閾値測定ではトーンが聞こえたらすぐに Enter を押してください (Ctrl+C で中断)。");

    let mut responder = ConsoleResponder::new(running);
    let outcome =
        screening::run_screening(&mut generator, &mut responder, SweepParams::from(&config.test))
            .await;

    // 成否にかかわらず出力を解放
    generator.cleanup();
    let result = outcome?;

    print_result(&result)?;

    let sink = report::build_sink(&config.report);
    report::hand_off(sink.as_ref(), &config.report.recipient, customer, &result).await?;

    log::info!("hearing-screen を終了しました");
    Ok(())
}

/// 単発トーン再生
async fn play_single_tone(args: &[String]) -> Result<()> {
    let frequency: f64 = parse_arg(args, 2, "周波数")?;
    let volume: f64 = parse_arg(args, 3, "音量")?;
    let ear: Ear = parse_arg(args, 4, "耳")?;

    let config = load_config(DEFAULT_CONFIG_PATH)?;
    let duration_ms = if args.len() > 5 {
        parse_arg(args, 5, "再生時間")?
    } else {
        config.test.tone_duration_ms
    };

    let running = install_interrupt_handler()?;
    let mut generator = ToneGenerator::new(&config.audio);
    if !generator.is_available() {
        log::warn!("音声出力がないため無音で終了します");
    }

    let mut completion = match generator.play_tone(frequency, volume, duration_ms, ear) {
        Ok(completion) => completion,
        Err(e) => {
            generator.cleanup();
            return Err(e.into());
        }
    };

    loop {
        tokio::select! {
            _ = &mut completion => break,
            _ = tokio::time::sleep(Duration::from_millis(100)) => {
                if !running.load(Ordering::SeqCst) {
                    generator.stop_tone();
                }
            }
        }
    }

    generator.cleanup();
    Ok(())
}

/// トーンをWAVファイルに描画
fn render_wav(args: &[String]) -> Result<()> {
    init_logger("info");
    let output = args
        .get(2)
        .with_context(|| format!("出力ファイルを指定してください\n{}", USAGE))?;
    let frequency: f64 = parse_arg(args, 3, "周波数")?;
    let volume: f64 = parse_arg(args, 4, "音量")?;
    let ear: Ear = parse_arg(args, 5, "耳")?;
    let duration_ms: u64 = parse_arg(args, 6, "再生時間")?;

    let frames = hearing_screen::wav_writer::render_tone(
        output,
        frequency,
        volume,
        ear,
        duration_ms,
        DEFAULT_SAMPLE_RATE,
    )?;
    println!("{} フレームを書き出しました: {}", frames, output);
    Ok(())
}

/// JSONファイルの検査データを採点
async fn score_file(args: &[String]) -> Result<()> {
    let input_path = args
        .get(2)
        .with_context(|| format!("入力ファイルを指定してください\n{}", USAGE))?;
    let config = load_config(DEFAULT_CONFIG_PATH)?;

    let content = std::fs::read_to_string(input_path)
        .with_context(|| format!("入力ファイルの読み込みに失敗: {}", input_path))?;
    let input: ScoreInput = serde_json::from_str(&content)
        .with_context(|| format!("入力ファイルのパースに失敗: {}", input_path))?;

    let result = scoring::evaluate(&input.answers, &input.left_ear_results, &input.right_ear_results)?;
    println!("{}", serde_json::to_string_pretty(&result)?);

    let sink = report::build_sink(&config.report);
    report::hand_off(sink.as_ref(), &config.report.recipient, input.customer_data, &result).await?;
    Ok(())
}

fn print_result(result: &HearingTestResult) -> Result<()> {
    let percentage =
        scoring::calculate_overall_percentage(&result.left_ear_results, &result.right_ear_results)?;

    println!();
    println!("=== 検査結果 ===");
    println!("{}", result.overall_assessment.headline());
    println!("判定: {}", result.overall_assessment.label());
    println!("理論スコア: {}", result.theoretical_score);
    println!("閾値スコア: {}%", percentage);
    for (name, ear) in [("左耳", &result.left_ear_results), ("右耳", &result.right_ear_results)] {
        println!("{}:", name);
        for sample in ear {
            println!(
                "  {:>5} Hz  {:.2}  {}",
                sample.frequency,
                sample.threshold,
                scoring::hearing_level(sample.threshold).label()
            );
        }
    }
    println!();
    for line in &result.recommendations {
        println!("- {}", line);
    }
    Ok(())
}

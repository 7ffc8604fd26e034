//! species_id コマンドライン
//!
//! 学習 (train)・単一画像推論 (predict)・一括評価 (evaluate)・設定表示 (show-config)

#![recursion_limit = "256"]
#[cfg(feature = "ml")]
mod cli {
    use std::path::PathBuf;

    use anyhow::{Context, Result};
    use burn::tensor::backend::{AutodiffBackend, Backend};
    use clap::{Parser, Subcommand, ValueEnum};

    use species_id_lib::backend::{
        cpu_device, gpu_device, CpuBackend, CpuTrainBackend, GpuBackend, GpuTrainBackend,
    };
    use species_id_lib::logging::init_logging;
    use species_id_lib::ml::{train_model, BatchEvaluator, InferenceEngine, ModelAdapter};
    use species_id_lib::model::{load_metadata, print_metadata_info, AppConfig, BackboneVariant, DeviceType};
    use species_id_lib::preprocess::Preprocessor;

    #[derive(Parser, Debug)]
    #[command(name = "species_id", version, about = "貝類の種判別（学習・推論・評価）")]
    struct Cli {
        /// 設定ファイル（JSON）
        #[arg(long, global = true, default_value_os_t = AppConfig::default_path())]
        config: PathBuf,

        /// 詳細ログ
        #[arg(short, long, global = true)]
        verbose: bool,

        /// 計算デバイス（設定ファイルより優先）
        #[arg(long, global = true, value_enum)]
        device: Option<DeviceArg>,

        #[command(subcommand)]
        command: Command,
    }

    #[derive(Copy, Clone, Debug, ValueEnum)]
    enum DeviceArg {
        Cpu,
        Wgpu,
    }

    impl From<DeviceArg> for DeviceType {
        fn from(arg: DeviceArg) -> Self {
            match arg {
                DeviceArg::Cpu => DeviceType::Cpu,
                DeviceArg::Wgpu => DeviceType::Wgpu,
            }
        }
    }

    #[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
    enum VariantArg {
        Large,
        Small,
        Both,
    }

    impl VariantArg {
        fn variants(self) -> Vec<BackboneVariant> {
            match self {
                VariantArg::Large => vec![BackboneVariant::Large],
                VariantArg::Small => vec![BackboneVariant::Small],
                VariantArg::Both => BackboneVariant::ALL.to_vec(),
            }
        }
    }

    #[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
    enum BackboneArg {
        Large,
        Small,
    }

    impl From<BackboneArg> for BackboneVariant {
        fn from(arg: BackboneArg) -> Self {
            match arg {
                BackboneArg::Large => BackboneVariant::Large,
                BackboneArg::Small => BackboneVariant::Small,
            }
        }
    }

    #[derive(Subcommand, Debug)]
    enum Command {
        /// モデルを学習してスナップショットを保存
        Train {
            /// 学習するバックボーン
            #[arg(long, value_enum, default_value_t = VariantArg::Both)]
            variant: VariantArg,
            /// 学習データ（クラス名のサブフォルダ）
            #[arg(long)]
            data_dir: Option<PathBuf>,
            /// モデルの保存先
            #[arg(long)]
            model_dir: Option<PathBuf>,
            #[arg(long)]
            epochs: Option<usize>,
            #[arg(long)]
            batch_size: Option<usize>,
            #[arg(long)]
            learning_rate: Option<f64>,
            /// 事前学習済みバックボーンの置き場所
            #[arg(long)]
            pretrained_dir: Option<PathBuf>,
        },
        /// 1枚の画像を判別して上位2件を表示
        Predict {
            /// 画像ファイル
            image: PathBuf,
            /// 使用するバックボーン
            #[arg(long, value_enum, default_value_t = BackboneArg::Large)]
            variant: BackboneArg,
            /// スナップショット（省略時は model_dir 内の既定ファイル）
            #[arg(long)]
            model: Option<PathBuf>,
            /// メタデータも表示
            #[arg(long)]
            show_metadata: bool,
        },
        /// テストデータを Large / Small の両モデルで評価してCSVに出力
        Evaluate {
            /// テストデータ（正解ラベル名のサブフォルダ）
            #[arg(long)]
            test_dir: Option<PathBuf>,
            #[arg(long)]
            model_dir: Option<PathBuf>,
            /// レポートCSVの出力先
            #[arg(long)]
            output: Option<PathBuf>,
        },
        /// 有効な設定を表示
        ShowConfig {
            /// 設定ファイルに書き出す
            #[arg(long)]
            write: bool,
        },
    }

    pub fn run() -> Result<()> {
        let cli = Cli::parse();
        init_logging(cli.verbose);

        let mut config = AppConfig::load_or_default(&cli.config)
            .with_context(|| format!("設定ファイルを読み込めません: {}", cli.config.display()))?;
        if let Some(device) = cli.device {
            config.device_type = device.into();
        }

        match cli.command {
            Command::Train {
                variant,
                data_dir,
                model_dir,
                epochs,
                batch_size,
                learning_rate,
                pretrained_dir,
            } => {
                if let Some(dir) = data_dir {
                    config.paths.train_dir = dir;
                }
                if let Some(dir) = model_dir {
                    config.paths.model_dir = dir;
                }
                if let Some(dir) = pretrained_dir {
                    config.paths.pretrained_dir = Some(dir);
                }
                if let Some(n) = epochs {
                    config.training.num_epochs = n;
                }
                if let Some(n) = batch_size {
                    config.training.batch_size = n;
                }
                if let Some(lr) = learning_rate {
                    config.training.learning_rate = lr;
                }
                config.validate().context("設定が不正です")?;

                for variant in variant.variants() {
                    match config.device_type {
                        DeviceType::Cpu => train::<CpuTrainBackend>(&config, variant, cpu_device())?,
                        DeviceType::Wgpu => train::<GpuTrainBackend>(&config, variant, gpu_device())?,
                    }
                }
            }
            Command::Predict {
                image,
                variant,
                model,
                show_metadata,
            } => {
                let variant = BackboneVariant::from(variant);
                let model_path = model.unwrap_or_else(|| config.paths.model_path(variant));
                if show_metadata {
                    let metadata = load_metadata(&model_path)
                        .with_context(|| format!("メタデータを読み込めません: {}", model_path.display()))?;
                    print_metadata_info(&metadata);
                }
                match config.device_type {
                    DeviceType::Cpu => predict::<CpuBackend>(&config, variant, &model_path, &image, cpu_device())?,
                    DeviceType::Wgpu => predict::<GpuBackend>(&config, variant, &model_path, &image, gpu_device())?,
                }
            }
            Command::Evaluate {
                test_dir,
                model_dir,
                output,
            } => {
                if let Some(dir) = test_dir {
                    config.paths.test_dir = dir;
                }
                if let Some(dir) = model_dir {
                    config.paths.model_dir = dir;
                }
                if let Some(path) = output {
                    config.paths.report_path = path;
                }
                match config.device_type {
                    DeviceType::Cpu => evaluate::<CpuBackend>(&config, cpu_device())?,
                    DeviceType::Wgpu => evaluate::<GpuBackend>(&config, gpu_device())?,
                }
            }
            Command::ShowConfig { write } => {
                config.display();
                if write {
                    config
                        .save(&cli.config)
                        .with_context(|| format!("設定を保存できません: {}", cli.config.display()))?;
                    println!("設定を保存しました: {}", cli.config.display());
                }
            }
        }

        Ok(())
    }

    fn train<B: AutodiffBackend>(config: &AppConfig, variant: BackboneVariant, device: B::Device) -> Result<()> {
        tracing::info!("使用デバイス: {}", config.device_type);
        let report = train_model::<B>(config, variant, device)
            .with_context(|| format!("{} の学習に失敗しました", variant))?;
        println!("{} を保存しました: {}", variant, report.model_path.display());
        Ok(())
    }

    fn predict<B: Backend>(
        config: &AppConfig,
        variant: BackboneVariant,
        model_path: &std::path::Path,
        image: &std::path::Path,
        device: B::Device,
    ) -> Result<()> {
        let adapter = ModelAdapter::new(config);
        let engine = InferenceEngine::<B>::load(&adapter, model_path, variant, device)
            .with_context(|| format!("モデルを読み込めません: {}", model_path.display()))?;

        let tensor = Preprocessor::new(&config.preprocess)
            .preprocess(image)
            .with_context(|| format!("画像を読み込めません: {}", image.display()))?;
        let prediction = engine.predict(&tensor)?;

        for line in prediction.report_lines() {
            println!("{}", line);
        }
        Ok(())
    }

    fn evaluate<B: Backend>(config: &AppConfig, device: B::Device) -> Result<()> {
        let evaluator = BatchEvaluator::<B>::load(config, device).context("モデルを読み込めません")?;
        let outcome = evaluator
            .run(&config.paths.test_dir, &config.paths.report_path)
            .with_context(|| format!("評価に失敗しました: {}", config.paths.test_dir.display()))?;

        println!("Results saved to {}", outcome.report_path.display());
        for summary in &outcome.summaries {
            println!(
                "{}: {}/{} correct ({:.2}%), mean {:.2} ms",
                summary.model,
                summary.correct,
                summary.images,
                summary.accuracy(),
                summary.mean_inference_time_ms
            );
        }
        Ok(())
    }

}

#[cfg(feature = "ml")]
fn main() -> anyhow::Result<()> {
    cli::run()
}

#[cfg(not(feature = "ml"))]
fn main() {
    println!("ML機能が有効化されていません");
}

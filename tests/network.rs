use approx::assert_abs_diff_eq;
use briny_cnn::NnError;
use briny_cnn::activation::Activation;
use briny_cnn::layers::{AveragePooling, Convolutional, FullyConnected};
use briny_cnn::loss::Loss;
use briny_cnn::network::{GradCheckMode, Network, TrainConfig};
use briny_cnn::optim::{Adagrad, GradientDescent, HessianDescent};
use briny_cnn::tensors::Float;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn small_cnn(seed: u64, out_act: Activation) -> Network {
    let mut net = Network::with_seed(seed);
    net.add(
        Convolutional::new(6, 6, 3, 1, 2)
            .activation(Activation::Tanh)
            .build()
            .unwrap(),
    )
    .unwrap();
    net.add(
        AveragePooling::new(4, 4, 2, 2)
            .activation(Activation::Sigmoid)
            .build()
            .unwrap(),
    )
    .unwrap();
    net.add(FullyConnected::new(8, 3).activation(out_act).build().unwrap())
        .unwrap();
    net
}

fn random_samples(n: usize, len: usize, seed: u64) -> Vec<Vec<Float>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| (0..len).map(|_| rng.random_range(-1.0..1.0)).collect())
        .collect()
}

/// Two classes: whichever of the first two inputs is larger.
fn separable() -> (Vec<Vec<Float>>, Vec<usize>) {
    let inputs = vec![
        vec![1.0, 0.0, 0.5],
        vec![0.0, 1.0, 0.5],
        vec![0.9, 0.2, -0.5],
        vec![0.1, 0.8, -0.5],
        vec![0.7, -0.3, 0.0],
        vec![-0.4, 0.6, 0.0],
    ];
    let labels = vec![0, 1, 0, 1, 0, 1];
    (inputs, labels)
}

#[test]
fn test_gradient_check_cnn_mse() {
    init();
    let mut net = small_cnn(3, Activation::Identity);
    let inputs = random_samples(2, 36, 4);
    let targets = random_samples(2, 3, 5);
    assert!(
        net.gradient_check(Loss::Mse, &inputs, &targets, 1e-2, GradCheckMode::All)
            .unwrap()
    );
}

#[test]
fn test_gradient_check_softmax_cross_entropy() {
    init();
    let mut net = small_cnn(6, Activation::Softmax);
    let inputs = random_samples(3, 36, 7);
    let targets = vec![
        vec![1.0, 0.0, 0.0],
        vec![0.0, 1.0, 0.0],
        vec![0.0, 0.0, 1.0],
    ];
    assert!(
        net.gradient_check(
            Loss::CrossEntropyMulticlass,
            &inputs,
            &targets,
            1e-2,
            GradCheckMode::Random
        )
        .unwrap()
    );
}

#[test]
fn test_gradient_check_single_layer() {
    init();
    let mut net = Network::with_seed(8);
    net.add(FullyConnected::new(2, 1).activation(Activation::Tanh).build().unwrap())
        .unwrap();
    let inputs = vec![vec![0.3, -0.2], vec![-0.5, 0.1]];
    let targets = vec![vec![0.5], vec![-0.25]];
    assert!(
        net.gradient_check(Loss::Mse, &inputs, &targets, 1e-3, GradCheckMode::All)
            .unwrap()
    );
    assert!(matches!(
        net.gradient_check(Loss::Mse, &inputs, &targets[..1], 1e-3, GradCheckMode::All),
        Err(NnError::DataMismatch(_))
    ));
}

#[test]
fn test_sigmoid_classifier_learns() {
    init();
    let (inputs, labels) = separable();
    let mut net = Network::with_seed(11);
    net.add(
        FullyConnected::new(3, 2)
            .activation(Activation::Sigmoid)
            .build()
            .unwrap(),
    )
    .unwrap();

    let targets: Vec<_> = labels.iter().map(|&l| net.label2vec(l).unwrap()).collect();
    let before = net.get_loss(Loss::Mse, &inputs, &targets).unwrap();
    let config = TrainConfig {
        epochs: 300,
        ..TrainConfig::default()
    };
    let mut opt = GradientDescent::with_alpha(0.5);
    assert!(net.train_labels(&mut opt, Loss::Mse, &inputs, &labels, &config).unwrap());
    let after = net.get_loss(Loss::Mse, &inputs, &targets).unwrap();
    assert!(after < before * 0.5, "loss {before} -> {after}");

    let result = net.test(&inputs, &labels).unwrap();
    assert_eq!(result.num_total, 6);
    assert_eq!(result.num_success, 6);
    assert_abs_diff_eq!(result.accuracy(), 100.0);
    assert_eq!(result.confusion_matrix[&1][&1], 3);
}

#[test]
fn test_hidden_layer_network_learns() {
    init();
    let (inputs, labels) = separable();
    let mut net = Network::with_seed(12);
    net.add(
        FullyConnected::new(3, 20)
            .activation(Activation::Tanh)
            .build()
            .unwrap(),
    )
    .unwrap();
    net.add(
        FullyConnected::new(20, 2)
            .activation(Activation::Sigmoid)
            .build()
            .unwrap(),
    )
    .unwrap();

    let targets: Vec<_> = labels.iter().map(|&l| net.label2vec(l).unwrap()).collect();
    let before = net.get_loss(Loss::CrossEntropy, &inputs, &targets).unwrap();
    let config = TrainConfig {
        epochs: 200,
        batch_size: 2,
        ..TrainConfig::default()
    };
    let mut opt = Adagrad::with_alpha(0.1);
    assert!(net.fit(&mut opt, Loss::CrossEntropy, &inputs, &targets, &config).unwrap());
    let after = net.get_loss(Loss::CrossEntropy, &inputs, &targets).unwrap();
    assert!(after < before, "loss {before} -> {after}");
    assert_eq!(net.test(&inputs, &labels).unwrap().num_success, 6);
}

#[test]
fn test_two_pairs_converge() {
    init();
    let mut net = Network::with_seed(13);
    net.add(
        FullyConnected::new(3, 20)
            .activation(Activation::Tanh)
            .build()
            .unwrap(),
    )
    .unwrap();
    net.add(
        FullyConnected::new(20, 2)
            .activation(Activation::Sigmoid)
            .build()
            .unwrap(),
    )
    .unwrap();

    let (a, t) = (vec![3.0, 0.0, -1.0], vec![0.3, 0.7]);
    let (a2, t2) = (vec![0.2, 0.5, 4.0], vec![0.5, 0.1]);
    let mut inputs = Vec::new();
    let mut targets = Vec::new();
    for _ in 0..100 {
        inputs.extend([a.clone(), a2.clone()]);
        targets.extend([t.clone(), t2.clone()]);
    }
    let config = TrainConfig {
        epochs: 30,
        ..TrainConfig::default()
    };
    assert!(net.fit(&mut GradientDescent::with_alpha(0.1), Loss::Mse, &inputs, &targets, &config).unwrap());

    let y = net.predict(&a).unwrap();
    assert_abs_diff_eq!(y[0], t[0], epsilon = 1e-4);
    assert_abs_diff_eq!(y[1], t[1], epsilon = 1e-4);
    let y = net.predict(&a2).unwrap();
    assert_abs_diff_eq!(y[0], t2[0], epsilon = 1e-4);
    assert_abs_diff_eq!(y[1], t2[1], epsilon = 1e-4);
}

#[test]
fn test_frozen_layer_survives_init_and_training() {
    init();
    let mut net = Network::with_seed(14);
    let mut ids = Vec::new();
    for (i, o) in [(2, 3), (3, 2), (2, 1)] {
        let fc = FullyConnected::new(i, o)
            .activation(Activation::Sigmoid)
            .build()
            .unwrap();
        ids.push(net.add(fc).unwrap());
    }
    net.layer_mut(ids[1]).unwrap().set_trainable(false);
    net.setup(false).unwrap();

    let w0 = [0.0, 1.0, 2.0, 3.0, 4.0, 5.0];
    let w1 = [6.0, 7.0, 8.0, 9.0, 8.0, 7.0];
    let w2 = [6.0, 5.0];
    for (&id, w) in ids.iter().zip([&w0[..], &w1[..], &w2[..]]) {
        net.layer(id).unwrap().weight_mut().unwrap().copy_from_slice(w);
    }

    net.init_weight().unwrap();
    assert_ne!(*net.layer(ids[0]).unwrap().weight().unwrap(), w0[..]);
    assert_eq!(*net.layer(ids[1]).unwrap().weight().unwrap(), w1[..]);
    assert_ne!(*net.layer(ids[2]).unwrap().weight().unwrap(), w2[..]);
    let after_init: Vec<Vec<Float>> = ids
        .iter()
        .map(|&id| net.layer(id).unwrap().weight().unwrap().to_vec())
        .collect();

    let inputs = vec![vec![1.0, 0.0], vec![0.0, 2.0]];
    let targets = vec![vec![2.0], vec![1.0]];
    let mut opt = Adagrad::default();
    assert!(net.fit(&mut opt, Loss::Mse, &inputs, &targets, &TrainConfig::default()).unwrap());

    assert_ne!(*net.layer(ids[0]).unwrap().weight().unwrap(), after_init[0][..]);
    assert_eq!(*net.layer(ids[1]).unwrap().weight().unwrap(), w1[..]);
    assert_ne!(*net.layer(ids[2]).unwrap().weight().unwrap(), after_init[2][..]);
}

#[test]
fn test_worker_count_does_not_change_the_update() {
    init();
    let inputs = random_samples(8, 36, 20);
    let targets = random_samples(8, 3, 21);

    let mut runs = Vec::new();
    for workers in [1, 3, 8] {
        let mut net = small_cnn(30, Activation::Identity);
        let config = TrainConfig {
            batch_size: 8,
            epochs: 1,
            n_workers: workers,
            ..TrainConfig::default()
        };
        net.fit(&mut GradientDescent::with_alpha(0.1), Loss::Mse, &inputs, &targets, &config)
            .unwrap();
        runs.push(net);
    }
    assert!(runs[0].has_same_weights(&runs[1], 1e-5));
    assert!(runs[0].has_same_weights(&runs[2], 1e-5));
}

#[test]
fn test_same_seed_same_network() {
    init();
    let mut a = small_cnn(40, Activation::Softmax);
    let mut b = small_cnn(40, Activation::Softmax);
    let mut c = small_cnn(41, Activation::Softmax);
    let x = random_samples(1, 36, 1).remove(0);
    let ya = a.predict(&x).unwrap();
    assert_eq!(ya, b.predict(&x).unwrap());
    c.predict(&x).unwrap();
    assert!(a.has_same_weights(&b, 0.0));
    assert!(!a.has_same_weights(&c, 1e-6));
    assert_abs_diff_eq!(ya.iter().sum::<Float>(), 1.0, epsilon = 1e-5);
}

#[test]
fn test_hessian_descent_trains() {
    init();
    let inputs = random_samples(6, 36, 50);
    let targets = random_samples(6, 3, 51);
    let mut net = small_cnn(52, Activation::Identity);
    let before = net.get_loss(Loss::Mse, &inputs, &targets).unwrap();

    let config = TrainConfig {
        batch_size: 6,
        epochs: 20,
        hessian_samples: 4,
        ..TrainConfig::default()
    };
    assert!(net.fit(&mut HessianDescent::default(), Loss::Mse, &inputs, &targets, &config).unwrap());
    let after = net.get_loss(Loss::Mse, &inputs, &targets).unwrap();
    assert!(after < before, "loss {before} -> {after}");

    let fc = &net.layers()[2];
    let edges = fc.param_edges();
    let hessian = edges[0].borrow();
    assert!(hessian.hessian().iter().all(|h| *h >= 0.0));
    assert!(hessian.hessian().iter().any(|h| *h > 0.0));
}

#[test]
fn test_exploding_weights_stop_training() {
    init();
    let mut net = Network::with_seed(60);
    net.add(FullyConnected::new(1, 1).build().unwrap()).unwrap();
    let config = TrainConfig {
        epochs: 3,
        ..TrainConfig::default()
    };
    let ok = net
        .fit(&mut GradientDescent::default(), Loss::Mse, &[vec![1e20]], &[vec![0.0]], &config)
        .unwrap();
    assert!(!ok);
    assert!(net.is_exploded());
}

#[test]
fn test_stop_from_callback() {
    init();
    let (inputs, labels) = separable();
    let mut net = Network::with_seed(70);
    net.add(FullyConnected::new(3, 2).build().unwrap()).unwrap();
    let targets: Vec<_> = labels.iter().map(|&l| net.label2vec(l).unwrap()).collect();

    let mut batches = 0;
    let mut epochs = 0;
    let config = TrainConfig {
        epochs: 5,
        ..TrainConfig::default()
    };
    net.train(
        &mut GradientDescent::default(),
        Loss::Mse,
        &inputs,
        &targets,
        &config,
        |n| {
            batches += 1;
            if batches == 2 {
                n.stop_ongoing_training();
            }
        },
        |_, _| epochs += 1,
    )
    .unwrap();
    assert_eq!(batches, 2);
    assert_eq!(epochs, 1);
}

#[test]
fn test_bad_shapes_are_reported() {
    init();
    let mut net = Network::with_seed(80);
    net.add(FullyConnected::new(36, 4).build().unwrap()).unwrap();
    assert!(matches!(
        net.add(FullyConnected::new(5, 1).build().unwrap()),
        Err(NnError::ConnectionMismatch {
            out_size: 4,
            in_size: 5,
            ..
        })
    ));
    assert!(matches!(
        AveragePooling::new(3, 3, 1, 2).build(),
        Err(NnError::PoolingSizeMismatch { .. })
    ));
    assert!(matches!(net.predict(&[0.0; 35]), Err(NnError::DataMismatch(_))));
}
